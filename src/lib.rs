// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bootstrap a machine from a dotfiles tree.
//!
//! A managed file tree, e.g., `~/.files` or `~/.secrets`, holds packages of
//! configuration files to link into the home directory, and setup scripts
//! that install everything else the host needs. Both depend on the
//! __host context__: operating system, true CPU architecture, hostname, and
//! user supplied tags.
//!
//! # Phases
//!
//! 1. __Link phase__: every package of every applicable package group is
//!    linked by stow, all at once. See [`manager::Manager::install`].
//! 2. __Setup phase__: setup scripts run one at a time, each in a process of
//!    its own that drops root unless the script asks to keep it. See
//!    [`manager::Manager::setup`].
//!
//! Setup needs root, so dotctl re-executes itself through sudo first, see
//! [`privilege`], handing the host context over through the environment,
//! see [`context`].

pub mod config;
pub mod context;
pub mod installer;
pub mod manager;
pub mod messages;
pub mod packages;
pub mod path;
pub mod platform;
pub mod privilege;
pub mod release;
pub mod script;
