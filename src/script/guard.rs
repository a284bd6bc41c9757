// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Guarded execution of setup script entry points.

use crate::{messages, privilege};

use super::ScriptError;

use std::{
    env,
    fs::{set_permissions, Permissions},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tracing::debug;

/// Permissions of temporary working directories.
pub const WORK_DIR_MODE: u32 = 0o750;

/// Run guard of a setup script entry point.
///
/// Wraps an entry point so that it:
///
/// 1. Runs as invoker, unless marked as root.
/// 2. Announces itself with a banner.
/// 3. Runs inside a fresh temporary working directory.
/// 4. Has any failure contained as a single error message, unless error
///    catching is turned off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    name: String,
    root: bool,
    debug: bool,
    catch_errors: bool,
}

impl Guard {
    /// Construct new guard for entry point with banner title.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: false,
            debug: false,
            catch_errors: true,
        }
    }

    /// Keep root identity instead of demoting.
    pub fn root(mut self, root: bool) -> Self {
        self.root = root;
        self
    }

    /// Print full error chain on failure.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Contain failures instead of propagating them.
    pub fn catch_errors(mut self, catch_errors: bool) -> Self {
        self.catch_errors = catch_errors;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wrap entry point into its guarded form.
    ///
    /// Contained failures are printed once to stderr, and surface as
    /// [`ScriptError::Failed`]. Uncontained failures surface as
    /// [`ScriptError::Uncaught`] without printing anything.
    pub fn wrap<F>(self, entry: F) -> impl FnOnce() -> Result<(), ScriptError>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        move || {
            let outcome = self.enter(entry);
            match outcome {
                Ok(()) => Ok(()),
                Err(error) if self.catch_errors => {
                    if self.debug {
                        eprintln!("{error:?}");
                    }
                    eprintln!("{error:#}");
                    Err(ScriptError::Failed { name: self.name })
                }
                Err(error) => Err(ScriptError::Uncaught {
                    name: self.name,
                    source: error.into(),
                }),
            }
        }
    }

    fn enter(&self, entry: impl FnOnce() -> anyhow::Result<()>) -> anyhow::Result<()> {
        if !self.root {
            privilege::demote()?;
        }

        println!("{}", messages::script(&self.name));
        let work_dir = WorkDir::enter().map_err(ScriptError::WorkDir)?;
        debug!("run {:?} in {:?}", self.name, work_dir.path().display());

        entry()
    }
}

/// Scoped temporary working directory.
///
/// Changes into a fresh temporary directory on entry. Changes back to the
/// prior working directory and removes the temporary one on drop, ignoring
/// any errors on the way.
#[derive(Debug)]
pub struct WorkDir {
    previous: PathBuf,
    temp: Option<TempDir>,
}

impl WorkDir {
    /// Enter fresh temporary working directory.
    ///
    /// # Errors
    ///
    /// - Return [`std::io::Error`] if the directory cannot be created or
    ///   entered.
    pub fn enter() -> std::io::Result<Self> {
        let previous = env::current_dir()?;
        let temp = tempfile::Builder::new().prefix("dotctl-").tempdir()?;
        set_permissions(temp.path(), Permissions::from_mode(WORK_DIR_MODE))?;
        env::set_current_dir(temp.path())?;

        Ok(Self {
            previous,
            temp: Some(temp),
        })
    }

    pub fn path(&self) -> &Path {
        self.temp
            .as_ref()
            .map(TempDir::path)
            .unwrap_or(self.previous.as_path())
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let _ = env::set_current_dir(&self.previous);
        if let Some(temp) = self.temp.take() {
            let _ = temp.close();
        }
    }
}
