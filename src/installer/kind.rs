// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Installer variants as data.
//!
//! Every supported package manager is described by a fixed command template
//! instead of code of its own. An installer invocation is always built as
//! `<base>... <install or uninstall args>... <package> <extra args>...`.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use super::InstallerError;

/// Placeholder in argument templates replaced by the rustup target triple.
pub const TARGET: &str = "{target}";

/// Supported package manager backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallerKind {
    BrewFormula,
    BrewCask,
    BrewTap,
    Yarn,
    Mas,
    Go,
    Pip,
    VsCode,
    HelmPlugin,
    Krew,
    Cargo,
    Rustup,
}

impl InstallerKind {
    pub const ALL: [Self; 12] = [
        Self::BrewFormula,
        Self::BrewCask,
        Self::BrewTap,
        Self::Yarn,
        Self::Mas,
        Self::Go,
        Self::Pip,
        Self::VsCode,
        Self::HelmPlugin,
        Self::Krew,
        Self::Cargo,
        Self::Rustup,
    ];

    /// Name used on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BrewFormula => "brew-formula",
            Self::BrewCask => "brew-cask",
            Self::BrewTap => "brew-tap",
            Self::Yarn => "yarn",
            Self::Mas => "mas",
            Self::Go => "go",
            Self::Pip => "pip",
            Self::VsCode => "vscode",
            Self::HelmPlugin => "helm-plugin",
            Self::Krew => "krew",
            Self::Cargo => "cargo",
            Self::Rustup => "rustup",
        }
    }

    /// Base command. First element is resolved on the search path.
    pub fn base(&self) -> &'static [&'static str] {
        match self {
            Self::BrewFormula | Self::BrewCask => &["brew"],
            Self::BrewTap => &["brew", "tap"],
            Self::Yarn => &["yarn", "global"],
            Self::Mas => &["mas"],
            Self::Go => &["go"],
            Self::Pip => &["python", "-m", "pip"],
            Self::VsCode => &["code"],
            Self::HelmPlugin => &["helm", "plugin"],
            Self::Krew => &["kubectl", "krew"],
            Self::Cargo => &["cargo", "-q"],
            Self::Rustup => &["rustup"],
        }
    }

    pub fn install_args(&self) -> &'static [&'static str] {
        match self {
            Self::BrewFormula => &["install", "--formula"],
            Self::BrewCask => &["install", "-q", "--cask"],
            Self::BrewTap => &[],
            Self::Yarn => &["add"],
            Self::Mas | Self::Go | Self::HelmPlugin | Self::Krew | Self::Cargo => &["install"],
            Self::Pip => &["install", "-qqq"],
            Self::VsCode => &["--install-extension"],
            Self::Rustup => &["component", "add", "--target", TARGET],
        }
    }

    /// Uninstall arguments, or `None` if removal is unsupported.
    pub fn uninstall_args(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::BrewFormula => Some(&["remove", "--formula"]),
            Self::BrewCask => Some(&["remove", "-q", "--cask"]),
            Self::BrewTap | Self::Go => None,
            Self::Yarn => Some(&["remove"]),
            Self::Mas | Self::HelmPlugin | Self::Krew | Self::Cargo => Some(&["uninstall"]),
            Self::Pip => Some(&["uninstall", "-y"]),
            Self::VsCode => Some(&["--uninstall-extension"]),
            Self::Rustup => Some(&["component", "remove", "--target", TARGET]),
        }
    }

    pub fn presence(&self) -> Presence {
        match self {
            Self::BrewFormula | Self::Yarn | Self::Go | Self::Cargo => Presence::Binary,
            Self::BrewCask => Presence::AppBundle,
            Self::BrewTap => Presence::Listing(Listing::lines(&[])),
            Self::Mas => Presence::Listing(Listing {
                field: Field::Whitespace,
                ..Listing::lines(&["list"])
            }),
            Self::Pip => Presence::Listing(Listing {
                field: Field::Delimited('='),
                ..Listing::lines(&["list", "--format", "freeze"])
            }),
            Self::VsCode => Presence::Listing(Listing {
                lowercase: true,
                ..Listing::lines(&["--list-extensions"])
            }),
            Self::HelmPlugin => Presence::Listing(Listing {
                header: 1,
                field: Field::Delimited('\t'),
                ..Listing::lines(&["list"])
            }),
            Self::Krew => Presence::Listing(Listing::lines(&["list"])),
            Self::Rustup => Presence::Listing(Listing::lines(&["component", "list", "--installed"])),
        }
    }

    /// Whether argument templates need a rustup target triple.
    pub fn needs_target(&self) -> bool {
        matches!(self, Self::Rustup)
    }
}

impl Display for InstallerKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.name())
    }
}

impl FromStr for InstallerKind {
    type Err = InstallerError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| InstallerError::UnknownKind { name: name.into() })
    }
}

/// How a variant decides whether a package is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Package binary, or its override, is on the search path.
    Binary,

    /// Executable of `/Applications/<p>.app/Contents/MacOS/<p>`, or the binary
    /// override, exists.
    AppBundle,

    /// Package is a member of the listing reported by the tool itself.
    Listing(Listing),
}

/// Listing subcommand of a variant and how to parse its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listing {
    /// Arguments appended to base command.
    pub args: &'static [&'static str],

    /// Number of leading header lines to skip.
    pub header: usize,

    /// Package identifier field of each line.
    pub field: Field,

    /// Compare identifiers case-insensitively.
    pub lowercase: bool,
}

impl Listing {
    const fn lines(args: &'static [&'static str]) -> Self {
        Self {
            args,
            header: 0,
            field: Field::Line,
            lowercase: false,
        }
    }

    /// Extract sorted package identifiers from listing output.
    pub fn parse(&self, output: &str) -> Vec<String> {
        let mut entries = output
            .lines()
            .skip(self.header)
            .filter_map(|line| self.field.extract(line))
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| self.normalize(entry))
            .collect::<Vec<_>>();
        entries.sort();

        entries
    }

    pub fn normalize(&self, entry: &str) -> String {
        if self.lowercase {
            entry.to_lowercase()
        } else {
            entry.to_owned()
        }
    }
}

/// Position of package identifier inside a listing line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Whole line.
    Line,

    /// Text before first delimiter.
    Delimited(char),

    /// First whitespace separated word.
    Whitespace,
}

impl Field {
    fn extract<'line>(&self, line: &'line str) -> Option<&'line str> {
        match self {
            Self::Line => Some(line),
            Self::Delimited(delimiter) => line.split(*delimiter).next(),
            Self::Whitespace => line.split_whitespace().next(),
        }
    }
}
