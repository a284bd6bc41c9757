// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod integration;

use anyhow::Result;
use nix::unistd::{close, dup, dup2, getgid, getuid};
use std::{
    fs::{create_dir_all, set_permissions, write, File, Permissions},
    io::{stderr, stdout, Read, Seek, SeekFrom, Write},
    os::unix::{fs::PermissionsExt, io::AsRawFd},
    path::{Path, PathBuf},
    process::{Command, Output},
};
use tempfile::TempDir;

/// Sandbox holding a home directory, a dotfiles tree, and mock executables.
pub(crate) struct TreeFixture {
    dir: TempDir,
}

impl TreeFixture {
    pub(crate) fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        create_dir_all(dir.path().join("home"))?;
        create_dir_all(dir.path().join("files"))?;
        create_dir_all(dir.path().join("bin"))?;

        Ok(Self { dir })
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn home(&self) -> PathBuf {
        self.path().join("home")
    }

    pub(crate) fn root(&self) -> PathBuf {
        self.path().join("files")
    }

    pub(crate) fn package(&self, name: &str, file: &str, contents: &str) -> Result<()> {
        let package = self.root().join(name);
        create_dir_all(&package)?;
        write(package.join(file), contents)?;
        Ok(())
    }

    /// Write executable relative to dotfiles tree.
    pub(crate) fn script(&self, path: &str, body: &str) -> Result<PathBuf> {
        let path = self.root().join(path);
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        executable(&path, body)?;
        Ok(path)
    }

    /// Place mock executable first on search path.
    pub(crate) fn mock_bin(&self, name: &str, body: &str) -> Result<()> {
        executable(&self.path().join("bin").join(name), body)
    }

    pub(crate) fn dotctl(&self, args: &[&str]) -> Result<Output> {
        let path = format!("{}:/usr/bin:/bin", self.path().join("bin").display());
        let output = Command::new(env!("CARGO_BIN_EXE_dotctl"))
            .args(args)
            .current_dir(self.path())
            .env_clear()
            .env("PATH", path)
            .env("HOME", self.home())
            .env("DOTFILES_PATH", self.root())
            .env("DOTSECRETS_PATH", self.home().join(".secrets"))
            .env("TAGSRC", self.home().join(".tagsrc"))
            .env("SUDO_UID", getuid().to_string())
            .env("SUDO_GID", getgid().to_string())
            .env("NO_COLOR", "1")
            .env("RUST_LOG", "warn")
            .output()?;

        Ok(output)
    }
}

/// Run closure with stdout and stderr of this process, and of every child
/// it spawns, redirected into files. Only use inside a forked sandbox.
pub(crate) fn capture<T>(run: impl FnOnce() -> T) -> Result<(T, String, String)> {
    let mut out = tempfile::tempfile()?;
    let mut err = tempfile::tempfile()?;
    stdout().flush()?;
    stderr().flush()?;

    let saved = (dup(1)?, dup(2)?);
    dup2(out.as_raw_fd(), 1)?;
    dup2(err.as_raw_fd(), 2)?;
    let value = run();
    stdout().flush()?;
    dup2(saved.0, 1)?;
    dup2(saved.1, 2)?;
    close(saved.0)?;
    close(saved.1)?;

    Ok((value, read_all(&mut out)?, read_all(&mut err)?))
}

fn read_all(file: &mut File) -> Result<String> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut content)?;
    Ok(content)
}

fn executable(path: &Path, body: &str) -> Result<()> {
    write(path, body)?;
    set_permissions(path, Permissions::from_mode(0o755))?;
    Ok(())
}
