// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package list files.
//!
//! Setup scripts keep the packages they manage in plain text list files
//! under the packages directory of the host context. A list is layered from
//! up to three kinds of sources, read in this order:
//!
//! 1. `<packages>/<file>` for every host.
//! 2. `<packages>/<system>/<file>` for the current operating system.
//! 3. `<packages>/<tag>/<file>` for every tag of the host, in tag order.
//!
//! Missing sources are simply skipped.
//!
//! # Entry Format
//!
//! One entry per line. Blank lines and lines starting with "#" are ignored.
//!
//! ```text
//! # name[:binary]
//! wezterm
//! visual-studio-code:~/bin/code
//! -iterm2
//! ```
//!
//! The optional binary overrides what presence checks probe for. A leading
//! "-" marks a package for removal instead of installation.

use crate::context::HostContext;

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Single entry of a package list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    name: String,
    binary: Option<String>,
    remove: bool,
}

impl PackageEntry {
    /// Construct new entry for package to install.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binary: None,
            remove: false,
        }
    }

    /// Probe for binary instead of package name in presence checks.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Mark entry for removal.
    pub fn removed(mut self) -> Self {
        self.remove = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binary(&self) -> Option<&str> {
        self.binary.as_deref()
    }

    pub fn is_removal(&self) -> bool {
        self.remove
    }
}

impl FromStr for PackageEntry {
    type Err = PackagesError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (remove, line) = match line.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start_matches('-')),
            None => (false, line),
        };

        let (name, binary) = match line.split_once(':') {
            Some((name, binary)) => (name.trim(), Some(binary.trim())),
            None => (line, None),
        };

        if name.is_empty() {
            return Err(PackagesError::EmptyEntry {
                line: line.to_owned(),
            });
        }

        // INVARIANT: Binary overrides may point into the home directory.
        let binary = binary
            .filter(|binary| !binary.is_empty())
            .map(|binary| shellexpand::tilde(binary).into_owned());

        Ok(Self {
            name: name.to_owned(),
            binary,
            remove,
        })
    }
}

impl Display for PackageEntry {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.remove {
            fmt.write_str("-")?;
        }
        fmt.write_str(&self.name)?;
        if let Some(binary) = &self.binary {
            write!(fmt, ":{binary}")?;
        }

        Ok(())
    }
}

/// Layered package list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packages {
    sources: Vec<PathBuf>,
}

impl Packages {
    /// Collect existing sources of list file under packages directory.
    pub fn new(
        directory: impl AsRef<Path>,
        system: &str,
        tags: &[String],
        file: impl AsRef<Path>,
    ) -> Self {
        let directory = directory.as_ref();
        let file = file.as_ref();

        let mut candidates = vec![directory.join(file)];
        if !system.is_empty() {
            candidates.push(directory.join(system).join(file));
        }
        candidates.extend(
            tags.iter()
                .filter(|tag| !tag.is_empty())
                .map(|tag| directory.join(tag).join(file)),
        );

        let sources = candidates
            .into_iter()
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        debug!("package list sources {sources:?}");

        Self { sources }
    }

    /// Collect sources of list file for a host context.
    pub fn for_context(context: &HostContext, file: impl AsRef<Path>) -> Self {
        Self::new(
            context.packages_directory(),
            context.operating_system(),
            context.tags(),
            file,
        )
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Parse every entry of every source, in layer order.
    ///
    /// # Errors
    ///
    /// - Return [`PackagesError::Read`] if a source cannot be read.
    /// - Return [`PackagesError::Entry`] if a line is not a valid entry.
    pub fn entries(&self) -> Result<Vec<PackageEntry>> {
        let mut entries = Vec::new();
        for source in &self.sources {
            let content = read_to_string(source).map_err(|err| PackagesError::Read {
                source: err,
                path: source.clone(),
            })?;

            for (index, line) in content.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                let entry = line.parse().map_err(|err| PackagesError::Entry {
                    source: Box::new(err),
                    path: source.clone(),
                    line: index + 1,
                })?;
                entries.push(entry);
            }
        }

        Ok(entries)
    }
}

/// Package list error types.
#[derive(Debug, thiserror::Error)]
pub enum PackagesError {
    /// Entry does not name a package.
    #[error("package entry {line:?} has no name")]
    EmptyEntry { line: String },

    /// Source file cannot be read.
    #[error("failed to read package list {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Source file contains invalid entry.
    #[error("invalid entry at {}:{line}", path.display())]
    Entry {
        #[source]
        source: Box<PackagesError>,
        path: PathBuf,
        line: usize,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PackagesError> = std::result::Result<T, E>;
