// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine the locations of the file trees dotctl manages, and of the
//! per-user files it reads. Each location can be overridden through an
//! environment variable. An override that is set but empty counts as unset,
//! so `DOTFILES_PATH=` still falls back to the default location.

use std::{env, path::PathBuf};

/// Variable naming the root of the dotfiles tree.
pub const DOTFILES_PATH: &str = "DOTFILES_PATH";

/// Variable naming the root of the secrets tree.
pub const DOTSECRETS_PATH: &str = "DOTSECRETS_PATH";

/// Variable naming the tag list file.
pub const TAGSRC: &str = "TAGSRC";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if home directory path cannot be
///   determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(PathError::NoWayHome)
}

/// Determine absolute path to the dotfiles tree.
///
/// Uses `$DOTFILES_PATH`, or `~/.files` by default.
///
/// # Errors
///
/// - Return [`PathError::ShellExpansion`] if the override cannot be expanded.
pub fn dotfiles_dir() -> Result<PathBuf> {
    env_path(DOTFILES_PATH, "~/.files")
}

/// Determine absolute path to the secrets tree.
///
/// Uses `$DOTSECRETS_PATH`, or `~/.secrets` by default.
///
/// # Errors
///
/// - Return [`PathError::ShellExpansion`] if the override cannot be expanded.
pub fn dotsecrets_dir() -> Result<PathBuf> {
    env_path(DOTSECRETS_PATH, "~/.secrets")
}

/// Determine absolute path to the tag list file.
///
/// Uses `$TAGSRC`, or `~/.tagsrc` by default.
///
/// # Errors
///
/// - Return [`PathError::ShellExpansion`] if the override cannot be expanded.
pub fn tagsrc_path() -> Result<PathBuf> {
    env_path(TAGSRC, "~/.tagsrc")
}

/// Expand tilde and variables of a user supplied path.
///
/// # Errors
///
/// - Return [`PathError::ShellExpansion`] if a referenced variable is unset.
pub fn expand(raw: &str) -> Result<PathBuf> {
    Ok(PathBuf::from(shellexpand::full(raw)?.into_owned()))
}

fn env_path(key: &str, default: &str) -> Result<PathBuf> {
    let raw = env::var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_owned());

    expand(&raw)
}

/// Path resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// No way to determine user's home directory.
    #[error("cannot determine absolute path to user's home directory")]
    NoWayHome,

    /// Path override references something that cannot be expanded.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<env::VarError>),
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;
