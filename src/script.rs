// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Setup scripts.
//!
//! A __setup script__ is an executable file directly under the setup
//! directory of a managed file tree, or under its operating system specific
//! subdirectory. Hidden files and files without any executable bit are not
//! setup scripts, which leaves room for package lists, READMEs, and helpers
//! next to them.
//!
//! Scripts declare how they want to be run through an optional manifest, see
//! [`crate::config`]. Running a script always goes through a [`Guard`].

mod guard;

pub use guard::*;

use crate::{
    config::{ConfigError, ScriptManifest},
    messages,
};

use std::{
    fs::{metadata, read, read_dir},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};
use tracing::{debug, instrument};

/// Setup script with its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupScript {
    path: PathBuf,
    manifest: ScriptManifest,
}

impl SetupScript {
    /// Load setup script and check its entry point contract.
    ///
    /// Contract deviations that still allow running the script are printed
    /// as warnings.
    ///
    /// # Errors
    ///
    /// - Return [`ScriptError::Load`] if script cannot be read.
    /// - Return [`ScriptError::Config`] if manifest is invalid, or entry point
    ///   cannot be run without arguments.
    #[instrument(skip(path), fields(path = %path.as_ref().display()), level = "debug")]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = std::path::absolute(path.as_ref()).map_err(|source| ScriptError::Load {
            source,
            path: path.as_ref().to_path_buf(),
        })?;
        let source = read(&path).map_err(|source| ScriptError::Load {
            source,
            path: path.clone(),
        })?;

        let config_error = |source: ConfigError| ScriptError::Config {
            source,
            path: path.clone(),
        };
        let manifest = ScriptManifest::from_source(&String::from_utf8_lossy(&source))
            .map_err(config_error)?;
        let warnings = manifest
            .entry
            .validate()
            .map_err(|error| config_error(error.into()))?;

        let script = Self { path, manifest };
        for warning in warnings {
            println!(
                "{}",
                messages::warning(format!("{} {warning}", script.file_name()))
            );
        }
        debug!("loaded {:?}", script.manifest);

        Ok(script)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &ScriptManifest {
        &self.manifest
    }

    /// File name of script.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Banner title of script.
    pub fn name(&self) -> String {
        self.manifest
            .name
            .clone()
            .unwrap_or_else(|| self.file_name())
    }

    /// Guard configured by manifest.
    pub fn guard(&self) -> Guard {
        Guard::new(self.name())
            .root(self.manifest.root)
            .debug(self.manifest.debug)
            .catch_errors(self.manifest.catch_errors)
    }

    /// Unguarded entry point, i.e., the script invoked without arguments.
    pub fn entry(&self) -> impl FnOnce() -> anyhow::Result<()> + '_ {
        move || {
            let status = Command::new(&self.path)
                .status()
                .map_err(|source| ScriptError::Spawn {
                    source,
                    path: self.path.clone(),
                })?;

            if !status.success() {
                return Err(ScriptError::Exit {
                    name: self.file_name(),
                    status,
                }
                .into());
            }

            Ok(())
        }
    }

    /// Run script through its guard.
    ///
    /// # Errors
    ///
    /// - Return [`ScriptError::Failed`] if script failed and the failure was
    ///   already reported.
    /// - Return [`ScriptError::Uncaught`] if script failed without error
    ///   catching.
    pub fn run(&self) -> Result<()> {
        self.guard().wrap(self.entry())()
    }
}

/// Check if path is a setup script.
pub fn is_setup_script(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    let hidden = path
        .file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    if hidden {
        return false;
    }

    match metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// List setup scripts directly under directory, unsorted.
///
/// # Errors
///
/// - Return [`ScriptError::ReadDir`] if directory cannot be read.
pub fn scripts_in(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let read_error = |source| ScriptError::ReadDir {
        source,
        path: dir.to_path_buf(),
    };

    let mut scripts = Vec::new();
    for entry in read_dir(dir).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();
        if is_setup_script(&path) {
            scripts.push(path);
        } else {
            debug!("skip {:?}, not a setup script", path.display());
        }
    }

    Ok(scripts)
}

/// Setup script error types.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// Script cannot be read.
    #[error("failed to load setup script {:?}", path.display())]
    Load {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Manifest is invalid or entry point cannot be run.
    #[error("cannot run setup script {:?}", path.display())]
    Config {
        #[source]
        source: ConfigError,
        path: PathBuf,
    },

    /// Setup directory cannot be read.
    #[error("failed to read setup directory {:?}", path.display())]
    ReadDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Temporary working directory cannot be set up.
    #[error("failed to enter temporary working directory")]
    WorkDir(#[source] std::io::Error),

    /// Script cannot be executed.
    #[error("failed to execute setup script {:?}", path.display())]
    Spawn {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Script exited unsuccessfully.
    #[error("setup script {name} exited with {status}")]
    Exit { name: String, status: ExitStatus },

    /// Script failed, failure already reported.
    #[error("setup script {name} failed")]
    Failed { name: String },

    /// Script failed without error catching.
    #[error("setup script {name} failed")]
    Uncaught {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ScriptError> = std::result::Result<T, E>;
