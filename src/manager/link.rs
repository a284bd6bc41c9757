// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Link phase.
//!
//! Every package of every applicable group is handed to its own stow process
//! at once. Completions are then reported one at a time. Whenever several
//! processes are done, the one discovered first is reported first, so the
//! report order follows discovery order among ties rather than wall-clock
//! completion order.

use crate::{messages, path::home_dir};

use super::{Manager, ManagerError, PackageGroup, Result};

use futures::future::{poll_fn, BoxFuture, FutureExt};
use std::{
    future::Future,
    io::Write,
    path::{Path, PathBuf},
    process::{Output, Stdio},
    task::Poll,
};
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// External linking tool.
pub const LINKER: &str = "stow";

/// Prefix of a benign stow warning dropped from reports.
pub const BENIGN_WARNING: &str = "BUG in find_stowed_path?";

/// In-flight request to link one package.
pub struct LinkOperation {
    group: PackageGroup,
    package: String,
    target: PathBuf,
    output: BoxFuture<'static, std::io::Result<Output>>,
}

impl LinkOperation {
    /// Spawn stow for package of group.
    ///
    /// Failing to spawn is reported as the outcome of the operation, not as
    /// an error of its own.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime with IO enabled.
    pub(crate) fn spawn(linker: &Path, group: PackageGroup, package: String, target: &Path) -> Self {
        let child = Command::new(linker)
            .arg("-d")
            .arg(group.directory())
            .arg("-t")
            .arg(target)
            .arg("-R")
            .arg(&package)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let output = async move { child?.wait_with_output().await }.boxed();

        Self {
            group,
            package,
            target: target.to_path_buf(),
            output,
        }
    }

    pub fn group(&self) -> &PackageGroup {
        &self.group
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

/// Completed link operation.
#[derive(Debug)]
pub struct LinkOutcome {
    pub group: PackageGroup,
    pub package: String,
    pub output: std::io::Result<Output>,
}

impl LinkOutcome {
    pub fn is_success(&self) -> bool {
        matches!(&self.output, Ok(output) if output.status.success())
    }

    /// Write report of outcome.
    ///
    /// Status line goes to `out` on success, to `err` on failure. Captured
    /// stdout follows on `out`, captured stderr without benign warnings on
    /// `err`.
    pub fn report(&self, out: &mut impl Write, err: &mut impl Write) -> std::io::Result<()> {
        let title = format!(
            "stow {} {}",
            messages::group_label(self.group.label()),
            messages::package(&self.package)
        );

        let output = match &self.output {
            Ok(output) => output,
            Err(error) => {
                writeln!(err, "{}", messages::failure(&title))?;
                writeln!(err, "{error}")?;
                return Ok(());
            }
        };

        if output.status.success() {
            writeln!(out, "{}", messages::success(&title))?;
        } else {
            writeln!(err, "{}", messages::failure(&title))?;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.is_empty() {
            writeln!(out, "{stdout}")?;
        }

        let stderr = String::from_utf8_lossy(&output.stderr)
            .lines()
            .filter(|line| !line.starts_with(BENIGN_WARNING))
            .map(|line| format!("{line}\n"))
            .collect::<String>();
        if !stderr.is_empty() {
            writeln!(err, "{stderr}")?;
        }

        Ok(())
    }
}

/// Tally of a link phase.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkSummary {
    pub linked: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
}

impl LinkSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Wait for next completed operation, preferring earliest discovered.
pub async fn next_completed(pending: &mut Vec<LinkOperation>) -> Option<LinkOutcome> {
    if pending.is_empty() {
        return None;
    }

    let (index, output) = poll_fn(|cx| {
        for (index, operation) in pending.iter_mut().enumerate() {
            if let Poll::Ready(output) = operation.output.as_mut().poll(cx) {
                return Poll::Ready((index, output));
            }
        }
        Poll::Pending
    })
    .await;

    // INVARIANT: Keep discovery order of everything still in flight.
    let operation = pending.remove(index);
    Some(LinkOutcome {
        group: operation.group,
        package: operation.package,
        output,
    })
}

impl Manager {
    /// Link every package of every applicable group into target.
    ///
    /// Target defaults to the home directory. Failed links are reported and
    /// tallied, never retried, and never abort the remaining links.
    ///
    /// # Errors
    ///
    /// - Return [`ManagerError::MissingLinker`] if stow is not on search path.
    /// - Return [`ManagerError::Path`] if home directory cannot be found.
    /// - Return [`ManagerError::ReadDir`] if a group cannot be listed.
    /// - Return [`ManagerError::Write`] if report cannot be written.
    #[instrument(skip(self, out, err), level = "debug")]
    pub async fn install(
        &self,
        target: Option<&Path>,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> Result<LinkSummary> {
        let linker = which::which(LINKER).map_err(ManagerError::MissingLinker)?;
        let target = match target {
            Some(target) => target.to_path_buf(),
            None => home_dir()?,
        };
        info!("link {:?} into {:?}", self.root().display(), target.display());

        let mut pending = Vec::new();
        for group in self.groups() {
            for package in group.packages()? {
                debug!("stow {} {package}", group.label());
                pending.push(LinkOperation::spawn(&linker, group.clone(), package, &target));
            }
        }

        let mut summary = LinkSummary::default();
        while let Some(outcome) = next_completed(&mut pending).await {
            outcome.report(out, err)?;
            let entry = (outcome.group.label(), outcome.package.clone());
            if outcome.is_success() {
                summary.linked.push(entry);
            } else {
                summary.failed.push(entry);
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::GroupKind;
    use futures::future::ready;
    use pretty_assertions::assert_eq;
    use std::{
        os::unix::process::ExitStatusExt,
        process::ExitStatus,
    };

    fn output(code: i32, stdout: &str, stderr: &str) -> std::io::Result<Output> {
        Ok(Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        })
    }

    fn operation(package: &str, output: BoxFuture<'static, std::io::Result<Output>>) -> LinkOperation {
        LinkOperation {
            group: PackageGroup::new(GroupKind::Global, "/files"),
            package: package.into(),
            target: "/home/blah".into(),
            output,
        }
    }

    #[tokio::test]
    async fn ties_resolve_in_discovery_order() {
        let (sender, receiver) = tokio::sync::oneshot::channel::<()>();
        let slow = async move {
            let _ = receiver.await;
            output(0, "", "")
        }
        .boxed();

        let mut pending = vec![
            operation("slow", slow),
            operation("first", ready(output(0, "", "")).boxed()),
            operation("second", ready(output(1, "", "")).boxed()),
        ];

        let mut order = Vec::new();
        for _ in 0..2 {
            if let Some(outcome) = next_completed(&mut pending).await {
                order.push(outcome.package);
            }
        }
        let _ = sender.send(());
        while let Some(outcome) = next_completed(&mut pending).await {
            order.push(outcome.package);
        }

        assert_eq!(order, vec!["first", "second", "slow"]);
    }

    #[tokio::test]
    async fn missing_linker_becomes_failed_outcome() {
        let group = PackageGroup::new(GroupKind::Global, "/files");
        let mut pending = vec![LinkOperation::spawn(
            Path::new("/nonexistent/stow"),
            group,
            "sample".into(),
            Path::new("/home/blah"),
        )];

        let outcome = next_completed(&mut pending).await;
        assert!(matches!(&outcome, Some(outcome) if !outcome.is_success() && outcome.output.is_err()));
        assert!(pending.is_empty());
        assert!(next_completed(&mut pending).await.is_none());
    }

    #[test]
    fn report_success_with_trailing_line() -> anyhow::Result<()> {
        colored::control::set_override(false);
        let outcome = LinkOutcome {
            group: PackageGroup::new(GroupKind::System("darwin".into()), "/files/.systems/darwin"),
            package: "sample".into(),
            output: output(0, "linked\n", ""),
        };

        let (mut out, mut err) = (Vec::new(), Vec::new());
        outcome.report(&mut out, &mut err)?;
        assert_eq!(
            String::from_utf8(out)?,
            "SUCCESS stow (OS) darwin sample\nlinked\n\n"
        );
        assert!(err.is_empty());

        Ok(())
    }

    #[test]
    fn report_failure_drops_benign_warning() -> anyhow::Result<()> {
        colored::control::set_override(false);
        let outcome = LinkOutcome {
            group: PackageGroup::new(GroupKind::Host("box".into()), "/files/.hostnames/box"),
            package: "sample".into(),
            output: output(
                1,
                "",
                "BUG in find_stowed_path? Absolute/relative mismatch\nWARNING! stowing sample would cause conflicts\n",
            ),
        };

        let (mut out, mut err) = (Vec::new(), Vec::new());
        outcome.report(&mut out, &mut err)?;
        assert!(out.is_empty());
        assert_eq!(
            String::from_utf8(err)?,
            "FAILURE stow (Host) box sample\nWARNING! stowing sample would cause conflicts\n\n"
        );
        assert!(!outcome.is_success());

        Ok(())
    }

    #[test]
    fn report_spawn_failure() -> anyhow::Result<()> {
        colored::control::set_override(false);
        let outcome = LinkOutcome {
            group: PackageGroup::new(GroupKind::Global, "/files"),
            package: "sample".into(),
            output: Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no stow")),
        };

        let (mut out, mut err) = (Vec::new(), Vec::new());
        outcome.report(&mut out, &mut err)?;
        assert_eq!(String::from_utf8(err)?, "FAILURE stow global sample\nno stow\n");

        Ok(())
    }
}
