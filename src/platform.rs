// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host platform queries.
//!
//! Determine the operating system, hostname, and the _true_ CPU architecture
//! of the current host.
//!
//! # True Architecture
//!
//! The machine string reported by `uname(2)` describes the architecture the
//! running binary was built for, not necessarily the CPU of the host. Binary
//! translation layers like Rosetta 2 on Darwin, or binfmt_misc with QEMU on
//! Linux, happily run an x86_64 dotctl on an ARM64 machine. Packages are
//! selected by architecture, so dotctl asks the host itself before trusting
//! `uname(2)`:
//!
//! - Darwin: the CPU brand string from `sysctl machdep.cpu.brand_string`.
//! - Linux: the "Architecture:" field from `lscpu`, which reads sysfs.
//!
//! Any failure falls back to the machine string of `uname(2)`.

use nix::sys::utsname::uname;
use std::process::Command;
use tracing::debug;

/// Canonical short forms of common raw CPU identifiers.
pub const COMMON_ARCH: &[(&str, &str)] = &[
    ("armv8", "arm64"),
    ("arm64e", "arm64"),
    ("aarch64", "arm64"),
    ("x86_64", "amd64"),
    ("armv7", "arm"),
    ("armv6", "arm"),
    ("x86", "386"),
];

/// Map raw CPU identifier to its canonical short form.
///
/// Unknown identifiers pass through lowercased.
pub fn normalize_arch(raw: impl AsRef<str>) -> String {
    let raw = raw.as_ref().trim().to_lowercase();
    COMMON_ARCH
        .iter()
        .find(|(from, _)| *from == raw)
        .map(|(_, to)| (*to).to_owned())
        .unwrap_or(raw)
}

/// Lowercased name of the operating system, e.g., "linux" or "darwin".
pub fn system() -> String {
    uname()
        .map(|info| info.sysname().to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Full network name of the host.
pub fn node() -> String {
    nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Short hostname, i.e., first label of the network name.
pub fn hostname() -> String {
    short_hostname(&node()).to_owned()
}

/// Normalized true architecture of the host.
pub fn machine() -> String {
    let raw = match system().as_str() {
        "darwin" => machine_darwin(),
        "linux" => machine_linux(),
        _ => uname_machine(),
    };

    normalize_arch(raw)
}

fn short_hostname(node: &str) -> &str {
    node.split('.').next().unwrap_or_default()
}

fn uname_machine() -> String {
    uname()
        .map(|info| info.machine().to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn machine_darwin() -> String {
    // INVARIANT: Brand string is set by the mach kernel itself.
    let output = Command::new("sysctl")
        .args(["-qn", "machdep.cpu.brand_string"])
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let brand = String::from_utf8_lossy(&output.stdout);
            arch_from_brand(&brand)
                .map(str::to_owned)
                .unwrap_or_else(uname_machine)
        }
        result => {
            debug!("cannot query cpu brand string: {result:?}");
            uname_machine()
        }
    }
}

fn machine_linux() -> String {
    let Ok(lscpu) = which::which("lscpu") else {
        return uname_machine();
    };

    match Command::new(lscpu).output() {
        Ok(output) => arch_from_lscpu(&String::from_utf8_lossy(&output.stdout))
            .unwrap_or_else(uname_machine),
        Err(error) => {
            debug!("cannot query lscpu: {error}");
            uname_machine()
        }
    }
}

fn arch_from_brand(brand: &str) -> Option<&'static str> {
    let brand = brand.trim().to_lowercase();
    if brand.starts_with("apple m") {
        Some("arm64e")
    } else if brand.starts_with("intel") {
        Some("amd64")
    } else {
        None
    }
}

fn arch_from_lscpu(listing: &str) -> Option<String> {
    // INVARIANT: Halt on first architecture field, even an empty one.
    let field = listing
        .lines()
        .find_map(|line| line.strip_prefix("Architecture:"))?
        .trim()
        .to_lowercase();

    (!field.is_empty()).then_some(field)
}
