// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Styled terminal messages.
//!
//! Report lines meant for the user, as opposed to diagnostics meant for
//! whoever debugs dotctl, which go through [`tracing`]. Styling honours
//! `NO_COLOR`, so the plain text of every message is stable.

use colored::Colorize;
use std::fmt::Display;

/// Banner naming a setup script.
pub fn script(title: impl Display) -> String {
    title.to_string().bright_yellow().bold().to_string()
}

/// Inline package group label.
pub fn group_label(title: impl Display) -> String {
    title.to_string().bright_blue().to_string()
}

pub fn package(name: impl Display) -> String {
    name.to_string().cyan().to_string()
}

pub fn path(name: impl Display) -> String {
    name.to_string().blue().to_string()
}

pub fn bin(name: impl Display) -> String {
    name.to_string().red().to_string()
}

pub fn info(title: impl Display) -> String {
    title.to_string().bright_blue().bold().to_string()
}

pub fn warning(message: impl Display) -> String {
    format!("{} {message}", "WARNING".yellow().bold())
}

pub fn failure(message: impl Display) -> String {
    format!("{} {message}", "FAILURE".red().bold())
}

pub fn success(message: impl Display) -> String {
    format!("{} {message}", "SUCCESS".green().bold())
}
