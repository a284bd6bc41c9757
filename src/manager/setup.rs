// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Setup phase.
//!
//! Setup scripts run strictly one after another, sorted by file name, each
//! in a process of its own. Dropping root is irreversible for a process, so
//! a fresh process per script keeps every script's demotion away from the
//! orchestrator and from its siblings.

use crate::script::scripts_in;

use super::{Manager, ManagerError, Result};

use std::{
    env,
    io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};
use tracing::{debug, instrument, warn};

/// Hidden subcommand running a single guarded setup script.
pub const EXEC_SCRIPT: &str = "exec-script";

/// Launcher of setup scripts in separate processes.
pub trait Launch {
    /// Run script to completion in a new process.
    fn launch(&self, script: &Path) -> io::Result<ExitStatus>;
}

/// Launch scripts through the `exec-script` subcommand of a dotctl binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfExec {
    program: PathBuf,
}

impl SelfExec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Launch through the currently running executable.
    ///
    /// # Errors
    ///
    /// - Return [`io::Error`] if current executable cannot be determined.
    pub fn current() -> io::Result<Self> {
        Ok(Self::new(env::current_exe()?))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Launch for SelfExec {
    fn launch(&self, script: &Path) -> io::Result<ExitStatus> {
        Command::new(&self.program)
            .arg(EXEC_SCRIPT)
            .arg(script)
            .status()
    }
}

/// Tally of a setup phase.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SetupSummary {
    pub ran: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl SetupSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Manager {
    /// Setup scripts in execution order.
    ///
    /// Merges scripts of the setup directory with scripts of its operating
    /// system subdirectory, sorted by file name.
    ///
    /// # Errors
    ///
    /// - Return [`ManagerError::MissingSetupDir`] if setup directory does not
    ///   exist.
    /// - Return [`ManagerError::Script`] if a directory cannot be read.
    pub fn setup_scripts(&self) -> Result<Vec<PathBuf>> {
        let setup_dir = self.context.setup_directory();
        if !setup_dir.is_dir() {
            return Err(ManagerError::MissingSetupDir {
                path: setup_dir.to_path_buf(),
            });
        }

        let mut scripts = scripts_in(setup_dir)?;
        let system = self.context.operating_system();
        let system_dir = setup_dir.join(system);
        if !system.is_empty() && system_dir.is_dir() {
            scripts.extend(scripts_in(&system_dir)?);
        }

        // INVARIANT: Stable sort, so setup directory wins ties of equal names.
        scripts.sort_by(|left, right| left.file_name().cmp(&right.file_name()));

        Ok(scripts)
    }

    /// Run every setup script, one at a time.
    ///
    /// Publishes host context to the environment first, so scripts see it.
    /// A failing script never stops the remaining ones.
    ///
    /// # Errors
    ///
    /// - Return [`ManagerError::MissingSetupDir`] if setup directory does not
    ///   exist.
    /// - Return [`ManagerError::Script`] if a directory cannot be read.
    #[instrument(skip(self, launcher), level = "debug")]
    pub fn setup(&self, launcher: &impl Launch) -> Result<SetupSummary> {
        let scripts = self.setup_scripts()?;
        self.context.publish();

        let mut summary = SetupSummary::default();
        for script in scripts {
            debug!("launch {:?}", script.display());
            match launcher.launch(&script) {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    debug!("{:?} exited with {status}", script.display());
                    summary.failed.push(script.clone());
                }
                Err(error) => {
                    warn!("cannot launch {:?}: {error}", script.display());
                    summary.failed.push(script.clone());
                }
            }
            summary.ran.push(script);
        }

        Ok(summary)
    }
}
