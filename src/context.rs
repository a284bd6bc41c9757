// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host context.
//!
//! A __host context__ is an immutable snapshot of the facts dotctl uses to
//! pick package groups for the current host, and that setup scripts need to
//! do their job: architecture, operating system, hostname, tags, and the
//! layout of the managed file tree.
//!
//! # Environment Channel
//!
//! Setup scripts and privilege-elevated re-executions of dotctl run as
//! separate processes. The process environment is the one channel used to
//! hand the context over to them. [`HostContext::publish`] writes every field
//! under a fixed variable name, and [`HostContext::from_env`] reads the exact
//! same names back without querying the operating system again.
//!
//! | Field                | Variable        |
//! |----------------------|-----------------|
//! | root directory       | `DOTFILES_PATH` |
//! | setup directory      | `SETUP_PATH`    |
//! | packages directory   | `PACKAGES_PATH` |
//! | architecture         | `ARCH`          |
//! | operating system     | `SYSTEM`        |
//! | hostname             | `HOST`          |
//! | tags (comma joined)  | `TAGS`          |

use crate::{
    path::{tagsrc_path, DOTFILES_PATH},
    platform,
};

use std::{
    env,
    fs::read_to_string,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Variable holding the setup directory.
pub const SETUP_PATH: &str = "SETUP_PATH";

/// Variable holding the packages directory.
pub const PACKAGES_PATH: &str = "PACKAGES_PATH";

/// Variable holding the normalized architecture.
pub const ARCH: &str = "ARCH";

/// Variable holding the lowercased operating system name.
pub const SYSTEM: &str = "SYSTEM";

/// Variable holding the short hostname.
pub const HOST: &str = "HOST";

/// Variable holding the comma joined tags.
pub const TAGS: &str = "TAGS";

/// Every variable a host context is published under.
pub const CONTEXT_VARS: [&str; 7] = [
    ARCH,
    DOTFILES_PATH,
    HOST,
    PACKAGES_PATH,
    SETUP_PATH,
    SYSTEM,
    TAGS,
];

/// Name of setup directory under the root directory.
pub const SETUP_DIR: &str = ".setup.d";

/// Name of packages directory under the setup directory.
pub const PACKAGES_DIR: &str = "packages";

/// Snapshot of environment facts about the current host.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HostContext {
    architecture: String,
    operating_system: String,
    hostname: String,
    root_directory: PathBuf,
    setup_directory: PathBuf,
    packages_directory: PathBuf,
    tags: Vec<String>,
}

impl HostContext {
    /// Discover host context for a managed file tree.
    ///
    /// Architecture and operating system honour non-empty `ARCH` and
    /// `SYSTEM` overrides, otherwise the host is queried. Tags are read from
    /// the tag list file, one tag per line. Everything besides the root
    /// directory is best-effort.
    ///
    /// # Errors
    ///
    /// - Return [`ContextError::InvalidRoot`] if `root` is not a directory.
    pub fn discover(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ContextError::InvalidRoot {
                path: root.to_path_buf(),
            });
        }

        let root_directory =
            std::path::absolute(root).map_err(|source| ContextError::Absolute {
                source,
                path: root.to_path_buf(),
            })?;
        let setup_directory = root_directory.join(SETUP_DIR);
        let packages_directory = setup_directory.join(PACKAGES_DIR);
        let architecture = env_override(ARCH)
            .map(|arch| arch.to_lowercase())
            .unwrap_or_else(platform::machine);
        let operating_system = env_override(SYSTEM)
            .map(|system| system.to_lowercase())
            .unwrap_or_else(platform::system);

        let context = Self {
            architecture,
            operating_system,
            hostname: platform::hostname(),
            root_directory,
            setup_directory,
            packages_directory,
            tags: read_tags(),
        };
        debug!("discovered {context:?}");

        Ok(context)
    }

    /// Rebuild host context purely from the environment.
    ///
    /// Missing variables yield empty fields, never an error.
    pub fn from_env() -> Self {
        let var = |key: &str| env::var(key).unwrap_or_default();

        Self {
            architecture: var(ARCH),
            operating_system: var(SYSTEM),
            hostname: var(HOST),
            root_directory: var(DOTFILES_PATH).into(),
            setup_directory: var(SETUP_PATH).into(),
            packages_directory: var(PACKAGES_PATH).into(),
            tags: split_tags(&var(TAGS)),
        }
    }

    /// Write every field into the environment of the current process.
    ///
    /// Child processes spawned afterwards inherit the context.
    pub fn publish(&self) {
        for (key, value) in self.vars() {
            env::set_var(key, value);
        }
    }

    /// List variable assignments this context is published as.
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        vec![
            (ARCH, self.architecture.clone()),
            (DOTFILES_PATH, self.root_directory.to_string_lossy().into_owned()),
            (HOST, self.hostname.clone()),
            (
                PACKAGES_PATH,
                self.packages_directory.to_string_lossy().into_owned(),
            ),
            (SETUP_PATH, self.setup_directory.to_string_lossy().into_owned()),
            (SYSTEM, self.operating_system.clone()),
            (TAGS, self.tags.join(",")),
        ]
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn operating_system(&self) -> &str {
        &self.operating_system
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub fn setup_directory(&self) -> &Path {
        &self.setup_directory
    }

    pub fn packages_directory(&self) -> &Path {
        &self.packages_directory
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

fn env_override(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn split_tags(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_owned)
        .collect()
}

fn read_tags() -> Vec<String> {
    let path = match tagsrc_path() {
        Ok(path) => path,
        Err(error) => {
            warn!("cannot resolve tag list: {error}");
            return Vec::new();
        }
    };

    if !path.is_file() {
        return Vec::new();
    }

    match read_to_string(&path) {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_owned)
            .collect(),
        Err(error) => {
            warn!("cannot read tag list {:?}: {error}", path.display());
            Vec::new()
        }
    }
}

/// Host context error types.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Root of managed file tree is not a directory.
    #[error("{:?} is not a valid directory", path.display())]
    InvalidRoot { path: PathBuf },

    /// Root of managed file tree cannot be made absolute.
    #[error("cannot determine absolute path of {:?}", path.display())]
    Absolute {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ContextError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::{create_dir, write};

    fn clear_context_vars() {
        for key in CONTEXT_VARS {
            env::remove_var(key);
        }
    }

    #[sealed_test]
    fn discover_layout_without_overrides() -> anyhow::Result<()> {
        clear_context_vars();
        let root = env::current_dir()?.join("files");
        create_dir(&root)?;
        env::set_var(crate::path::TAGSRC, root.join("missing-tags"));

        let context = HostContext::discover(&root)?;
        assert_eq!(context.root_directory(), root.as_path());
        assert_eq!(context.setup_directory(), root.join(".setup.d"));
        assert_eq!(context.packages_directory(), root.join(".setup.d/packages"));
        assert_eq!(context.architecture(), platform::machine());
        assert_eq!(context.operating_system(), platform::system());
        assert_eq!(context.hostname(), platform::hostname());
        assert!(context.tags().is_empty());

        Ok(())
    }

    #[sealed_test(env = [("ARCH", "SuperCPU"), ("SYSTEM", "superos")])]
    fn discover_honours_overrides() -> anyhow::Result<()> {
        let root = env::current_dir()?;
        let tagsrc = root.join(".tagsrc");
        write(&tagsrc, "foo\nbar\n\n")?;
        env::set_var(crate::path::TAGSRC, &tagsrc);

        let context = HostContext::discover(&root)?;
        assert_eq!(context.architecture(), "supercpu");
        assert_eq!(context.operating_system(), "superos");
        assert_eq!(context.tags(), ["foo".to_string(), "bar".to_string()]);

        Ok(())
    }

    #[sealed_test(env = [("ARCH", ""), ("SYSTEM", "superos")])]
    fn empty_override_queries_host() -> anyhow::Result<()> {
        let context = HostContext::discover(env::current_dir()?)?;
        assert_eq!(context.architecture(), platform::machine());
        assert_eq!(context.operating_system(), "superos");

        Ok(())
    }

    #[sealed_test]
    fn discover_rejects_missing_root() -> anyhow::Result<()> {
        let root = env::current_dir()?.join("nope");
        let result = HostContext::discover(&root);
        assert!(matches!(result, Err(ContextError::InvalidRoot { path }) if path == root));

        Ok(())
    }

    #[sealed_test]
    fn discover_rejects_regular_file() -> anyhow::Result<()> {
        let root = env::current_dir()?.join("file.txt");
        write(&root, "not a dir")?;
        assert!(HostContext::discover(&root).is_err());

        Ok(())
    }

    #[sealed_test(env = [("ARCH", "supercpu"), ("HOST", "test.local"), ("TAGS", "a,,b")])]
    fn from_env_reads_fixed_names() {
        env::remove_var(SYSTEM);
        env::remove_var(DOTFILES_PATH);

        let context = HostContext::from_env();
        assert_eq!(context.architecture(), "supercpu");
        assert_eq!(context.hostname(), "test.local");
        assert_eq!(context.operating_system(), "");
        assert_eq!(context.root_directory(), Path::new(""));
        assert_eq!(context.tags(), ["a".to_string(), "b".to_string()]);
    }

    #[sealed_test]
    fn publish_then_from_env_round_trips() -> anyhow::Result<()> {
        clear_context_vars();
        let tagsrc = env::current_dir()?.join(".tagsrc");
        write(&tagsrc, "work\nlaptop\n")?;
        env::set_var(crate::path::TAGSRC, &tagsrc);

        let context = HostContext::discover(env::current_dir()?)?;
        context.publish();

        assert_eq!(env::var(TAGS)?, "work,laptop");
        assert_eq!(
            env::var(DOTFILES_PATH)?,
            context.root_directory().to_string_lossy()
        );
        assert_eq!(HostContext::from_env(), context);

        Ok(())
    }
}
