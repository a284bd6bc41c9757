// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Privilege transitions.
//!
//! Setup scripts may need root to do their job, e.g., change system settings
//! or install system packages, but most of them must not run as root at all.
//! Dotctl thus elevates itself to root up front through an external
//! escalation tool (sudo), and drops back to the identity of the user that
//! invoked it before running any setup script that does not ask for root.
//!
//! # One Way Street
//!
//! Dropping root is irreversible for a process. Once the user identity is
//! switched, there is no going back. The transitions are modeled as
//! typestates to respect that by construction:
//!
//! ```text
//! Unprivileged --elevate--> (re-exec as root) --> Elevated --demote--> Demoted
//! ```
//!
//! [`Demoted`] offers no way back to [`Elevated`]. A root process that
//! cannot discover the identity of its invoker is _blocked_, because it could
//! never demote safely, and surfaces as [`PrivilegeError::MissingInvoker`].
//!
//! # Invoker Identity
//!
//! Sudo records the real user and group of the invoking user in `SUDO_UID`
//! and `SUDO_GID`. These are the only source of the identity to drop to.
//!
//! Demotion is best-effort privilege separation, not a sandbox.

use crate::context::HostContext;

use nix::{
    errno::Errno,
    unistd::{getegid, geteuid, getgid, getuid, setgid, setsid, setuid, Gid, Uid},
};
use std::{
    convert::Infallible,
    env,
    ffi::OsString,
    num::ParseIntError,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info, instrument};

/// Variable holding user identifier of the invoking user.
pub const SUDO_UID: &str = "SUDO_UID";

/// Variable holding group identifier of the invoking user.
pub const SUDO_GID: &str = "SUDO_GID";

/// External privilege escalation tool.
pub const ESCALATION_TOOL: &str = "sudo";

/// Identity of the user that invoked dotctl through the escalation tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invoker {
    uid: Uid,
    gid: Gid,
}

impl Invoker {
    /// Construct new invoker identity.
    pub fn new(uid: Uid, gid: Gid) -> Self {
        Self { uid, gid }
    }

    /// Read saved invoker identity from `SUDO_UID` and `SUDO_GID`.
    ///
    /// # Errors
    ///
    /// - Return [`PrivilegeError::MissingInvoker`] if either variable is unset.
    /// - Return [`PrivilegeError::InvalidInvoker`] if either variable is not
    ///   a numeric identifier.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            uid: Uid::from_raw(id_var(SUDO_UID)?),
            gid: Gid::from_raw(id_var(SUDO_GID)?),
        })
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn gid(&self) -> Gid {
        self.gid
    }

    /// Switch current process over to invoker identity.
    ///
    /// Detaches into a new session, then sets group list, group, and user in
    /// that order. Changing groups needs the user identity that is about to
    /// be dropped. Only issues system calls, so it is safe to call between
    /// fork and exec.
    ///
    /// # Errors
    ///
    /// - Return [`Errno`] of the first system call that fails. Being a
    ///   process group leader already is not considered a failure.
    pub fn assume(&self) -> nix::Result<()> {
        match setsid() {
            Ok(_) | Err(Errno::EPERM) => {}
            Err(errno) => return Err(errno),
        }
        set_groups(&[self.gid])?;
        setgid(self.gid)?;
        setuid(self.uid)
    }
}

/// Target to re-execute as root.
///
/// Describes the current program along with its original arguments, plus any
/// extra variable assignments to hand over to the root process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reexec {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(String, String)>,
}

impl Reexec {
    /// Construct new re-execution target.
    pub fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    /// Target current executable with its original arguments.
    ///
    /// # Errors
    ///
    /// - Return [`PrivilegeError::CurrentExe`] if path to current executable
    ///   cannot be determined.
    pub fn current() -> Result<Self> {
        let program = env::current_exe().map_err(PrivilegeError::CurrentExe)?;
        Ok(Self::new(program, env::args_os().skip(1)))
    }

    /// Add extra variable assignment for the root process.
    ///
    /// Takes precedence over host context variables of the same name.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Build escalation command line.
    ///
    /// Host context is passed as explicit `KEY=VALUE` assignments rather than
    /// through sudo's `--preserve-env`, which does not survive exec.
    pub fn escalation_command(&self, tool: impl AsRef<Path>, context: &HostContext) -> Command {
        let mut assignments: Vec<(String, String)> = context
            .vars()
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value))
            .collect();

        for (key, value) in &self.env {
            match assignments.iter_mut().find(|(name, _)| name == key) {
                Some(slot) => slot.1 = value.clone(),
                None => assignments.push((key.clone(), value.clone())),
            }
        }

        let mut command = Command::new(tool.as_ref());
        command
            .args(assignments.iter().map(|(key, value)| format!("{key}={value}")))
            .arg("--")
            .arg(&self.program)
            .args(&self.args);

        command
    }
}

/// Privilege state of current process.
#[derive(Debug)]
pub enum Privilege {
    /// Running without root identity.
    Unprivileged(Unprivileged),

    /// Running as root with a known invoker.
    Elevated(Elevated),
}

impl Privilege {
    /// Inspect privilege state of current process.
    ///
    /// # Errors
    ///
    /// - Return [`PrivilegeError::MissingInvoker`] if running as root without
    ///   a discoverable invoker identity.
    pub fn current() -> Result<Self> {
        if !is_root() {
            return Ok(Self::Unprivileged(Unprivileged { _private: () }));
        }

        Ok(Self::Elevated(Elevated {
            invoker: Invoker::from_env()?,
        }))
    }
}

/// Process without root identity.
#[derive(Debug)]
pub struct Unprivileged {
    _private: (),
}

impl Unprivileged {
    /// Replace current process with a root re-execution of target.
    ///
    /// Only ever returns on failure.
    ///
    /// # Errors
    ///
    /// - Return [`PrivilegeError::MissingEscalationTool`] if sudo is not on
    ///   the search path.
    /// - Return [`PrivilegeError::Reexec`] if sudo cannot be executed.
    #[instrument(skip(self, context), level = "debug")]
    pub fn elevate(self, context: &HostContext, target: &Reexec) -> Result<Infallible> {
        let tool = which::which(ESCALATION_TOOL).map_err(|source| {
            PrivilegeError::MissingEscalationTool {
                tool: ESCALATION_TOOL,
                source,
            }
        })?;

        info!("elevate through {:?}", tool.display());
        let source = target.escalation_command(&tool, context).exec();

        Err(PrivilegeError::Reexec { source, tool })
    }
}

/// Root process with a known invoker.
#[derive(Debug)]
pub struct Elevated {
    invoker: Invoker,
}

impl Elevated {
    pub fn invoker(&self) -> Invoker {
        self.invoker
    }

    /// Drop to invoker identity for good.
    ///
    /// # Errors
    ///
    /// - Return [`PrivilegeError::Demote`] if identity cannot be switched.
    pub fn demote(self) -> Result<Demoted> {
        debug!(
            "demote to uid {} gid {}",
            self.invoker.uid, self.invoker.gid
        );
        self.invoker.assume().map_err(PrivilegeError::Demote)?;

        Ok(Demoted {
            invoker: self.invoker,
        })
    }
}

/// Former root process now running as its invoker.
#[derive(Debug)]
pub struct Demoted {
    invoker: Invoker,
}

impl Demoted {
    pub fn invoker(&self) -> Invoker {
        self.invoker
    }
}

/// Check if current process runs with root user and group identity.
pub fn is_root() -> bool {
    getuid().is_root() && getgid().as_raw() == 0
}

/// Make sure current process runs as root.
///
/// Re-executes target under sudo when not root, passing the host context
/// along. Never returns in that case unless re-execution fails. When
/// already root, verifies that the invoker identity can be found, since
/// demotion would be impossible later on.
///
/// # Errors
///
/// - Return [`PrivilegeError::MissingInvoker`] if root without invoker.
/// - Return [`PrivilegeError::MissingEscalationTool`] if sudo is not on the
///   search path.
/// - Return [`PrivilegeError::Reexec`] if sudo cannot be executed.
pub fn elevate(context: &HostContext, target: &Reexec) -> Result<Elevated> {
    match Privilege::current()? {
        Privilege::Unprivileged(state) => match state.elevate(context, target)? {},
        Privilege::Elevated(state) => Ok(state),
    }
}

/// Drop current process to invoker identity if running as root.
///
/// No-op for non-root processes.
///
/// # Errors
///
/// - Return [`PrivilegeError::MissingInvoker`] if root without invoker.
/// - Return [`PrivilegeError::Demote`] if identity cannot be switched.
pub fn demote() -> Result<()> {
    demote_from(getuid().is_root())
}

fn demote_from(root: bool) -> Result<()> {
    if !root {
        return Ok(());
    }

    // INVARIANT: Invoker is resolved before any identity system call.
    Elevated {
        invoker: Invoker::from_env()?,
    }
    .demote()?;

    Ok(())
}

/// Require root effective user and group identity.
///
/// # Errors
///
/// - Return [`PrivilegeError::NotRoot`] otherwise.
pub fn assert_root() -> Result<()> {
    if geteuid().is_root() && getegid().as_raw() == 0 {
        return Ok(());
    }

    Err(PrivilegeError::NotRoot)
}

/// Make child process of command run as invoker.
pub fn demote_command(command: &mut Command, invoker: Invoker) {
    // SAFETY: Invoker::assume only performs system calls and never allocates.
    unsafe {
        command.pre_exec(move || invoker.assume().map_err(std::io::Error::from));
    }
}

fn id_var(key: &'static str) -> Result<u32> {
    let value = env::var(key).map_err(|_| PrivilegeError::MissingInvoker { var: key })?;
    value
        .trim()
        .parse()
        .map_err(|source| PrivilegeError::InvalidInvoker {
            source,
            var: key,
            value,
        })
}

#[cfg(not(target_vendor = "apple"))]
fn set_groups(groups: &[Gid]) -> nix::Result<()> {
    nix::unistd::setgroups(groups)
}

#[cfg(target_vendor = "apple")]
fn set_groups(groups: &[Gid]) -> nix::Result<()> {
    // SAFETY: Gid is a transparent wrapper over gid_t.
    let result = unsafe { libc::setgroups(groups.len() as libc::c_int, groups.as_ptr().cast()) };
    Errno::result(result).map(drop)
}

/// Privilege transition error types.
#[derive(Debug, thiserror::Error)]
pub enum PrivilegeError {
    /// Invoker identity variable is not set.
    #[error("{var} not found - please run as user using sudo")]
    MissingInvoker { var: &'static str },

    /// Invoker identity variable is not a numeric identifier.
    #[error("invalid {var} value {value:?}")]
    InvalidInvoker {
        #[source]
        source: ParseIntError,
        var: &'static str,
        value: String,
    },

    /// Escalation tool cannot be found on search path.
    #[error("escalation tool {tool:?} not found on search path")]
    MissingEscalationTool {
        tool: &'static str,
        #[source]
        source: which::Error,
    },

    /// Escalation tool cannot be executed.
    #[error("failed to re-execute through {:?}", tool.display())]
    Reexec {
        #[source]
        source: std::io::Error,
        tool: PathBuf,
    },

    /// Path to current executable cannot be determined.
    #[error("cannot determine path to current executable")]
    CurrentExe(#[source] std::io::Error),

    /// Process identity cannot be switched to invoker.
    #[error("failed to assume invoker identity")]
    Demote(#[source] Errno),

    /// Operation requires root identity.
    #[error("root user and group identity required - please run using sudo")]
    NotRoot,
}

/// Friendly result alias :3
pub type Result<T, E = PrivilegeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("SUDO_UID", "1000"), ("SUDO_GID", " 100 ")])]
    fn invoker_from_env() -> anyhow::Result<()> {
        let invoker = Invoker::from_env()?;
        assert_eq!(invoker.uid(), Uid::from_raw(1000));
        assert_eq!(invoker.gid(), Gid::from_raw(100));

        Ok(())
    }

    #[sealed_test(env = [("SUDO_UID", "1000")])]
    fn invoker_requires_both_ids() {
        env::remove_var(SUDO_GID);
        let result = Invoker::from_env();
        assert!(matches!(
            result,
            Err(PrivilegeError::MissingInvoker { var: SUDO_GID })
        ));
    }

    #[sealed_test(env = [("SUDO_UID", "blah"), ("SUDO_GID", "100")])]
    fn invoker_rejects_garbage() {
        let result = Invoker::from_env();
        assert!(matches!(
            result,
            Err(PrivilegeError::InvalidInvoker { var: SUDO_UID, .. })
        ));
    }

    #[sealed_test(env = [
        ("ARCH", "amd64"),
        ("DOTFILES_PATH", "/home/blah/.files"),
        ("HOST", "box"),
        ("PACKAGES_PATH", "/home/blah/.files/.setup.d/packages"),
        ("SETUP_PATH", "/home/blah/.files/.setup.d"),
        ("SYSTEM", "linux"),
        ("TAGS", "work,laptop"),
    ])]
    fn escalation_command_passes_context() {
        let context = HostContext::from_env();
        let target = Reexec::new("/usr/bin/dotctl", ["files", "setup"])
            .env("DOTFILES_PATH", "/srv/files")
            .env("DOTSECRETS_PATH", "/srv/secrets");
        let command = target.escalation_command("/usr/bin/sudo", &context);

        let args = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        let expect = vec![
            "ARCH=amd64",
            "DOTFILES_PATH=/srv/files",
            "HOST=box",
            "PACKAGES_PATH=/home/blah/.files/.setup.d/packages",
            "SETUP_PATH=/home/blah/.files/.setup.d",
            "SYSTEM=linux",
            "TAGS=work,laptop",
            "DOTSECRETS_PATH=/srv/secrets",
            "--",
            "/usr/bin/dotctl",
            "files",
            "setup",
        ];
        assert_eq!(command.get_program(), "/usr/bin/sudo");
        assert_eq!(args, expect);
    }

    #[sealed_test]
    fn demote_without_root_is_noop() -> anyhow::Result<()> {
        if getuid().is_root() {
            return Ok(());
        }

        env::remove_var(SUDO_UID);
        env::remove_var(SUDO_GID);
        demote()?;
        assert!(!getuid().is_root());

        Ok(())
    }

    #[sealed_test]
    fn demote_as_root_without_invoker_fails() {
        if !getuid().is_root() {
            return;
        }

        env::remove_var(SUDO_UID);
        env::remove_var(SUDO_GID);
        assert!(matches!(
            demote(),
            Err(PrivilegeError::MissingInvoker { .. })
        ));
        assert!(matches!(
            Privilege::current(),
            Err(PrivilegeError::MissingInvoker { .. })
        ));
    }

    #[sealed_test]
    fn invoker_missing_from_cleared_env() {
        env::remove_var(SUDO_UID);
        env::remove_var(SUDO_GID);
        assert!(matches!(
            Invoker::from_env(),
            Err(PrivilegeError::MissingInvoker { var: SUDO_UID })
        ));
    }

    #[sealed_test]
    fn root_demotion_without_invoker_fails_before_switching() {
        env::remove_var(SUDO_UID);
        env::remove_var(SUDO_GID);
        let before = (getuid(), getgid());

        assert!(matches!(
            demote_from(true),
            Err(PrivilegeError::MissingInvoker { var: SUDO_UID })
        ));
        assert_eq!((getuid(), getgid()), before);
        assert!(demote_from(false).is_ok());
    }

    #[sealed_test]
    fn demote_assumes_invoker_identity() -> anyhow::Result<()> {
        // Demoting root to root keeps the sandbox usable for later checks.
        env::set_var(SUDO_UID, getuid().to_string());
        env::set_var(SUDO_GID, getgid().to_string());
        let before = (getuid(), getgid());

        demote()?;
        assert_eq!((getuid(), getgid()), before);

        Ok(())
    }

    #[test]
    fn assert_root_matches_identity() {
        let root = geteuid().is_root() && getegid().as_raw() == 0;
        assert_eq!(assert_root().is_ok(), root);
    }
}
