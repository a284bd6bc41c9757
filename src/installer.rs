// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package manager installers.
//!
//! Uniform capability interface over heterogeneous package manager command
//! line tools: check whether a package is present, install it, uninstall it.
//! Setup scripts compose these into "is it present, if not install it"
//! loops, see [`reconcile`].
//!
//! # Listing Cache
//!
//! Variants that check presence through the tool's own listing subcommand
//! run that subcommand at most once per [`Installer`]. The listing is frozen
//! afterwards. Packages installed or removed through the same installer are
//! __not__ reflected in later presence checks.

mod kind;

pub use kind::*;

use crate::{
    messages,
    packages::PackageEntry,
    privilege::{demote_command, Invoker},
};

use std::{
    cell::OnceCell,
    ffi::OsString,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};
use tracing::{debug, instrument, warn};

/// Package manager capabilities.
pub trait Install {
    /// Check if package is present, probing for binary instead if given.
    fn is_installed(&self, package: &str, binary: Option<&str>) -> Result<bool>;

    /// Install package. Leading "-" on package name is stripped.
    fn install(&self, package: &str, args: &[&str]) -> Result<ExitStatus>;

    /// Uninstall package. Leading "-" on package name is stripped.
    fn uninstall(&self, package: &str, args: &[&str]) -> Result<ExitStatus>;
}

/// Installer backed by a package manager command line tool.
#[derive(Debug)]
pub struct Installer {
    kind: InstallerKind,
    program: PathBuf,
    target: Option<String>,
    as_user: Option<Invoker>,
    listing: OnceCell<Vec<String>>,
}

impl Installer {
    /// Construct new installer of given kind.
    ///
    /// Resolves base command on the search path up front. Rustup installers
    /// also determine their target triple right away.
    ///
    /// # Errors
    ///
    /// - Return [`InstallerError::NotFound`] if base command is not on the
    ///   search path.
    /// - Return [`InstallerError::NoTarget`] if rustup reports no installed
    ///   target.
    #[instrument(level = "debug")]
    pub fn new(kind: InstallerKind) -> Result<Self> {
        let base = kind.base()[0];
        let program =
            which::which(base).map_err(|source| InstallerError::NotFound { program: base, source })?;
        debug!("resolved {base} to {:?}", program.display());

        let mut installer = Self {
            kind,
            program,
            target: None,
            as_user: None,
            listing: OnceCell::new(),
        };

        if kind.needs_target() {
            let output = installer.capture(&["target", "list", "--installed"])?;
            let target = output
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .ok_or(InstallerError::NoTarget)?;
            installer.target = Some(target.to_owned());
        }

        Ok(installer)
    }

    /// Run every invocation as invoker instead of current identity.
    pub fn as_user(mut self, invoker: Invoker) -> Self {
        self.as_user = Some(invoker);
        self
    }

    pub fn kind(&self) -> InstallerKind {
        self.kind
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Installed packages reported by listing subcommand.
    ///
    /// Fetched on first call, frozen afterwards.
    ///
    /// # Errors
    ///
    /// - Return [`InstallerError::Unsupported`] if variant has no listing.
    /// - Return [`InstallerError::Spawn`] if listing subcommand cannot run.
    pub fn listing(&self) -> Result<&[String]> {
        if let Some(listing) = self.listing.get() {
            return Ok(listing);
        }

        let Presence::Listing(rule) = self.kind.presence() else {
            return Err(InstallerError::Unsupported {
                kind: self.kind,
                operation: "list",
            });
        };

        let entries = rule.parse(&self.capture(rule.args)?);
        debug!("{} listing {entries:?}", self.kind);

        Ok(self.listing.get_or_init(|| entries))
    }

    /// Full command line for operation on package.
    pub fn command_line(&self, operation: &[&str], package: &str, args: &[&str]) -> Vec<OsString> {
        let mut line: Vec<OsString> = vec![self.program.clone().into()];
        line.extend(self.kind.base()[1..].iter().map(OsString::from));
        line.extend(operation.iter().map(|arg| self.fill(arg)));
        line.push(package.trim_start_matches('-').into());
        line.extend(args.iter().map(OsString::from));

        line
    }

    fn fill(&self, arg: &str) -> OsString {
        match (arg, &self.target) {
            (TARGET, Some(target)) => target.into(),
            _ => arg.into(),
        }
    }

    fn command(&self, line: &[OsString]) -> Command {
        let mut command = Command::new(&line[0]);
        command.args(&line[1..]);
        if let Some(invoker) = self.as_user {
            demote_command(&mut command, invoker);
        }

        command
    }

    fn capture(&self, args: &[&str]) -> Result<String> {
        let mut line: Vec<OsString> = vec![self.program.clone().into()];
        line.extend(self.kind.base()[1..].iter().map(OsString::from));
        line.extend(args.iter().map(OsString::from));

        let output = self
            .command(&line)
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| InstallerError::Spawn {
                source,
                command: render(&line),
            })?;
        if !output.status.success() {
            warn!("{:?} exited with {}", render(&line), output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run(&self, line: Vec<OsString>) -> Result<ExitStatus> {
        debug!("run {:?}", render(&line));
        self.command(&line)
            .status()
            .map_err(|source| InstallerError::Spawn {
                source,
                command: render(&line),
            })
    }
}

impl Install for Installer {
    fn is_installed(&self, package: &str, binary: Option<&str>) -> Result<bool> {
        let binary = binary.filter(|binary| !binary.is_empty());
        let present = match self.kind.presence() {
            Presence::Binary => which::which(binary.unwrap_or(package)).is_ok(),
            Presence::AppBundle => match binary {
                Some(binary) => which::which(binary).is_ok(),
                None => {
                    let bundle = format!("/Applications/{package}.app/Contents/MacOS/{package}");
                    which::which(bundle).is_ok()
                }
            },
            Presence::Listing(rule) => {
                let key = match (binary, &self.target) {
                    (Some(binary), _) => rule.normalize(binary),
                    (None, Some(target)) => rule.normalize(&format!("{package}-{target}")),
                    (None, None) => rule.normalize(package),
                };
                self.listing()?.binary_search(&key).is_ok()
            }
        };

        Ok(present)
    }

    fn install(&self, package: &str, args: &[&str]) -> Result<ExitStatus> {
        self.run(self.command_line(self.kind.install_args(), package, args))
    }

    fn uninstall(&self, package: &str, args: &[&str]) -> Result<ExitStatus> {
        let operation = self.kind.uninstall_args().ok_or(InstallerError::Unsupported {
            kind: self.kind,
            operation: "uninstall",
        })?;

        self.run(self.command_line(operation, package, args))
    }
}

/// Tally of a [`reconcile`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub checked: usize,
    pub changed: usize,
    pub failed: usize,
}

/// Bring package entries to their desired state.
///
/// Installs missing packages, removes present packages marked for removal.
/// Progress lines go to `out`. A failing package is counted and reported,
/// the remaining entries are still processed.
///
/// # Errors
///
/// - Return [`InstallerError::Write`] if progress cannot be written.
pub fn reconcile(
    installer: &impl Install,
    entries: impl IntoIterator<Item = PackageEntry>,
    out: &mut impl Write,
) -> Result<Reconciled> {
    let mut tally = Reconciled::default();

    for entry in entries {
        tally.checked += 1;
        let name = messages::package(entry.name());
        writeln!(out, "checking {name}...")?;

        let present = match installer.is_installed(entry.name(), entry.binary()) {
            Ok(present) => present,
            Err(error) => {
                warn!("cannot check {}: {error}", entry.name());
                tally.failed += 1;
                continue;
            }
        };

        let result = match (entry.is_removal(), present) {
            (false, false) => {
                writeln!(out, "installing {name}...")?;
                installer.install(entry.name(), &[])
            }
            (true, true) => {
                writeln!(out, "removing {name}...")?;
                installer.uninstall(entry.name(), &[])
            }
            _ => continue,
        };

        match result {
            Ok(status) if status.success() => tally.changed += 1,
            Ok(status) => {
                warn!("{} exited with {status}", entry.name());
                tally.failed += 1;
            }
            Err(error) => {
                warn!("{}: {error}", entry.name());
                tally.failed += 1;
            }
        }
    }

    Ok(tally)
}

fn render(line: &[OsString]) -> String {
    line.iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Installer error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallerError {
    /// Backing binary is not on search path.
    #[error("{program} not found on search path")]
    NotFound {
        program: &'static str,
        #[source]
        source: which::Error,
    },

    /// Variant does not support operation.
    #[error("{kind} installer does not support {operation}")]
    Unsupported {
        kind: InstallerKind,
        operation: &'static str,
    },

    /// Rustup has no installed target.
    #[error("rustup reports no installed target")]
    NoTarget,

    /// Variant name is not known.
    #[error("unknown installer {name:?}")]
    UnknownKind { name: String },

    /// Command cannot be spawned.
    #[error("failed to run {command:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        command: String,
    },

    /// Progress cannot be written.
    #[error(transparent)]
    Write(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = InstallerError> = std::result::Result<T, E>;
