// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Managed file tree orchestration.
//!
//! A managed file tree, e.g., `~/.files` or `~/.secrets`, is made of
//! __package groups__. Each group is a directory of independent packages,
//! i.e., non-hidden subdirectories whose files get linked into a target
//! directory by stow:
//!
//! | Group         | Directory                    | Label           |
//! |---------------|------------------------------|-----------------|
//! | global        | `<root>`                     | `global`        |
//! | OS-scoped     | `<root>/.systems/<os>`       | `(OS) <os>`     |
//! | host-scoped   | `<root>/.hostnames/<host>`   | `(Host) <host>` |
//!
//! A group only applies if its directory exists. The tree can also carry
//! setup scripts under `<root>/.setup.d`, and `<root>/.setup.d/<os>`.
//!
//! The [`Manager`] drives two phases over a tree: linking every package of
//! every applicable group, see [`Manager::install`], and running every setup
//! script, see [`Manager::setup`].

mod link;
mod setup;

pub use link::*;
pub use setup::*;

use crate::{
    context::{ContextError, HostContext},
    path::PathError,
    script::ScriptError,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_dir,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Directory of OS-scoped groups under the root directory.
pub const SYSTEMS_DIR: &str = ".systems";

/// Directory of host-scoped groups under the root directory.
pub const HOSTS_DIR: &str = ".hostnames";

/// Scope of a package group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupKind {
    Global,
    System(String),
    Host(String),
}

/// Directory of independent packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageGroup {
    kind: GroupKind,
    directory: PathBuf,
}

impl PackageGroup {
    pub fn new(kind: GroupKind, directory: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            directory: directory.into(),
        }
    }

    pub fn kind(&self) -> &GroupKind {
        &self.kind
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Human readable group tag.
    pub fn label(&self) -> String {
        self.to_string()
    }

    /// List packages of group.
    ///
    /// # Errors
    ///
    /// - Return [`ManagerError::ReadDir`] if group directory cannot be read.
    pub fn packages(&self) -> Result<Vec<String>> {
        list_packages(&self.directory)
    }
}

impl Display for PackageGroup {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            GroupKind::Global => fmt.write_str("global"),
            GroupKind::System(name) => write!(fmt, "(OS) {name}"),
            GroupKind::Host(name) => write!(fmt, "(Host) {name}"),
        }
    }
}

/// List packages directly under directory, sorted by name.
///
/// Packages are non-hidden directories. Everything else is ignored.
///
/// # Errors
///
/// - Return [`ManagerError::ReadDir`] if directory cannot be read.
pub fn list_packages(dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let dir = dir.as_ref();
    let read_error = |source| ManagerError::ReadDir {
        source,
        path: dir.to_path_buf(),
    };

    let mut packages = Vec::new();
    for entry in read_dir(dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        packages.push(name);
    }
    packages.sort();

    Ok(packages)
}

/// Orchestrator of a managed file tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manager {
    context: HostContext,
}

impl Manager {
    /// Construct new manager, discovering host context for root directory.
    ///
    /// # Errors
    ///
    /// - Return [`ManagerError::Context`] if root is not a valid directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_context(HostContext::discover(root)?))
    }

    /// Construct new manager over an already established host context.
    pub fn with_context(context: HostContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &HostContext {
        &self.context
    }

    pub fn root(&self) -> &Path {
        self.context.root_directory()
    }

    /// Package groups applying to current host, global group first.
    pub fn groups(&self) -> Vec<PackageGroup> {
        let mut groups = vec![PackageGroup::new(GroupKind::Global, self.root())];

        let system = self.context.operating_system();
        let system_dir = self.root().join(SYSTEMS_DIR).join(system);
        if !system.is_empty() && system_dir.is_dir() {
            groups.push(PackageGroup::new(GroupKind::System(system.into()), system_dir));
        }

        let host = self.context.hostname();
        let host_dir = self.root().join(HOSTS_DIR).join(host);
        if !host.is_empty() && host_dir.is_dir() {
            groups.push(PackageGroup::new(GroupKind::Host(host.into()), host_dir));
        }
        debug!("applicable groups {groups:?}");

        groups
    }
}

/// Orchestration error types.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Root directory is invalid.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Default link target cannot be determined.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Stow is not on search path.
    #[error("stow is not installed")]
    MissingLinker(#[source] which::Error),

    /// Setup directory does not exist.
    #[error("setup directory {:?} does not exist", path.display())]
    MissingSetupDir { path: PathBuf },

    /// Directory cannot be read.
    #[error("failed to read directory {:?}", path.display())]
    ReadDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Setup scripts cannot be collected.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Report cannot be written.
    #[error(transparent)]
    Write(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = ManagerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        env,
        fs::{create_dir, create_dir_all, write},
    };

    #[sealed_test]
    fn list_only_visible_directories() -> anyhow::Result<()> {
        let dir = env::current_dir()?;
        create_dir(dir.join("foo"))?;
        create_dir(dir.join(".hidden"))?;
        create_dir(dir.join("bar"))?;
        write(dir.join("baz.txt"), "blah")?;

        assert_eq!(list_packages(&dir)?, vec!["bar", "foo"]);

        Ok(())
    }

    #[sealed_test]
    fn list_missing_directory_fails() -> anyhow::Result<()> {
        let dir = env::current_dir()?.join("nope");
        assert!(matches!(
            list_packages(&dir),
            Err(ManagerError::ReadDir { path, .. }) if path == dir
        ));

        Ok(())
    }

    #[test]
    fn group_labels() {
        let global = PackageGroup::new(GroupKind::Global, "/files");
        let system = PackageGroup::new(GroupKind::System("darwin".into()), "/files/.systems/darwin");
        let host = PackageGroup::new(GroupKind::Host("box".into()), "/files/.hostnames/box");
        assert_eq!(global.label(), "global");
        assert_eq!(system.label(), "(OS) darwin");
        assert_eq!(host.label(), "(Host) box");
    }

    #[sealed_test(env = [("SYSTEM", "superos")])]
    fn groups_require_existing_directories() -> anyhow::Result<()> {
        let root = env::current_dir()?;
        create_dir_all(root.join(".systems/superos"))?;
        create_dir_all(root.join(".systems/otheros"))?;
        create_dir_all(root.join(".hostnames/not-this-host.invalid"))?;
        env::set_var(crate::path::TAGSRC, root.join("no-tags"));

        let manager = Manager::new(&root)?;
        let groups = manager.groups();
        let labels = groups.iter().map(PackageGroup::label).collect::<Vec<_>>();
        assert_eq!(labels, vec!["global", "(OS) superos"]);
        assert_eq!(groups[1].directory(), root.join(".systems/superos"));

        Ok(())
    }

    #[sealed_test(env = [
        ("SYSTEM", "superos"),
        ("HOST", "box"),
        ("ARCH", "amd64"),
        ("TAGS", ""),
    ])]
    fn host_group_follows_context() -> anyhow::Result<()> {
        let root = env::current_dir()?;
        create_dir_all(root.join(".hostnames/box"))?;
        env::set_var(crate::context::PACKAGES_PATH, "");
        env::set_var(crate::context::SETUP_PATH, "");
        env::set_var(crate::path::DOTFILES_PATH, &root);

        let manager = Manager::with_context(HostContext::from_env());
        let labels = manager
            .groups()
            .iter()
            .map(PackageGroup::label)
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["global", "(Host) box"]);

        Ok(())
    }
}
