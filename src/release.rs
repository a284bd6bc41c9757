// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote binaries.
//!
//! Fetch a single binary from a URL, or from an asset of a GitHub release,
//! optionally pull it out of an archive, and install it into a directory.
//!
//! # Patterns
//!
//! Asset file names and release tags often embed the version, operating
//! system, or architecture, e.g., `fzf-{version}-{os}_{arch}.tar.gz`. These
//! are written as patterns with the following placeholders:
//!
//! | Placeholder    | Value                                |
//! |----------------|--------------------------------------|
//! | `{name}`       | source name of the binary            |
//! | `{version}`    | release version                      |
//! | `{os}`         | operating system of host context     |
//! | `{arch}`       | architecture of host context         |
//! | `{repository}` | GitHub repository, e.g., `junegunn/fzf` |
//!
//! # Installation
//!
//! The binary is written to a temporary file inside the destination
//! directory first, then moved over the target, so the target is replaced in
//! one step. Binaries under the home directory are only accessible by their
//! owner (0700), anywhere else they are executable by everyone (0755).

use crate::{messages, path::home_dir};

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::{
    env,
    fs::{set_permissions, Permissions},
    io::{Cursor, Read, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    str::FromStr,
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Base URL of the GitHub API.
pub const GITHUB_API: &str = "https://api.github.com";

/// Base URL of GitHub repositories.
pub const GITHUB: &str = "https://github.com";

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Values of pattern placeholders.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatternVars {
    pub name: String,
    pub version: String,
    pub os: String,
    pub arch: String,
    pub repository: String,
}

impl PatternVars {
    /// Replace every placeholder of pattern.
    pub fn fill(&self, pattern: &str) -> String {
        pattern
            .replace("{name}", &self.name)
            .replace("{version}", &self.version)
            .replace("{os}", &self.os)
            .replace("{arch}", &self.arch)
            .replace("{repository}", &self.repository)
    }
}

/// Archive formats a binary can be extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unarchiver {
    Tar,
    TarGz,
    Zip,
}

impl Unarchiver {
    /// Pick format from file name extension, if it is an archive at all.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    /// Extract member from in-memory archive.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::MemberNotFound`] if archive has no such file.
    /// - Return [`ReleaseError::Archive`] or [`ReleaseError::Zip`] if archive
    ///   is malformed.
    pub fn extract(&self, content: &[u8], member: &str) -> Result<Vec<u8>> {
        match self {
            Self::Tar => untar(Cursor::new(content), member),
            Self::TarGz => untar(flate2::read::GzDecoder::new(Cursor::new(content)), member),
            Self::Zip => unzip(content, member),
        }
    }
}

impl FromStr for Unarchiver {
    type Err = ReleaseError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "tar" => Ok(Self::Tar),
            "tar.gz" | "tgz" => Ok(Self::TarGz),
            "zip" => Ok(Self::Zip),
            _ => Err(ReleaseError::UnknownArchive { name: name.into() }),
        }
    }
}

fn untar(reader: impl Read, member: &str) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries().map_err(ReleaseError::Archive)? {
        let mut entry = entry.map_err(ReleaseError::Archive)?;
        let path = entry.path().map_err(ReleaseError::Archive)?.into_owned();
        let path = path.strip_prefix(".").unwrap_or(path.as_path());
        if path != Path::new(member) || !entry.header().entry_type().is_file() {
            continue;
        }

        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(ReleaseError::Archive)?;
        return Ok(content);
    }

    Err(ReleaseError::MemberNotFound {
        member: member.into(),
    })
}

fn unzip(content: &[u8], member: &str) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(content))?;
    let mut file = match archive.by_name(member) {
        Ok(file) if !file.is_dir() => file,
        Ok(_) | Err(zip::result::ZipError::FileNotFound) => {
            return Err(ReleaseError::MemberNotFound {
                member: member.into(),
            })
        }
        Err(error) => return Err(error.into()),
    };

    let mut content = Vec::new();
    file.read_to_end(&mut content)
        .map_err(ReleaseError::Archive)?;

    Ok(content)
}

/// Remote binary fetchable from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    target_name: String,
    source_name: String,
    url: Url,
    unarchiver: Option<Unarchiver>,
}

impl Remote {
    /// Construct new remote binary.
    ///
    /// Source name, i.e., the archive member to extract, defaults to the
    /// target name.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::InvalidUrl`] if URL is not absolute.
    pub fn new(
        target_name: impl Into<String>,
        url: &str,
        source_name: Option<String>,
        unarchiver: Option<Unarchiver>,
    ) -> Result<Self> {
        let target_name = target_name.into();
        let url = Url::parse(url).map_err(|error| ReleaseError::InvalidUrl {
            url: url.into(),
            reason: error.to_string(),
        })?;
        if !url.has_host() {
            return Err(ReleaseError::InvalidUrl {
                url: url.into(),
                reason: "missing host".into(),
            });
        }

        Ok(Self {
            source_name: source_name.unwrap_or_else(|| target_name.clone()),
            target_name,
            url,
            unarchiver,
        })
    }

    /// Construct remote binary from URL pattern.
    ///
    /// Archive format is picked from the file name of the URL unless set
    /// explicitly.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::InvalidUrl`] if filled URL is not absolute.
    pub fn from_pattern(
        target_name: impl Into<String>,
        pattern: &str,
        vars: &PatternVars,
        source_name: Option<&str>,
        unarchiver: Option<Unarchiver>,
    ) -> Result<Self> {
        let url = vars.fill(pattern);
        let file_name = url.split(['?', '#']).next().unwrap_or_default();
        let unarchiver = unarchiver.or_else(|| Unarchiver::from_file_name(file_name));

        Self::new(
            target_name,
            &url,
            source_name.map(|name| vars.fill(name)),
            unarchiver,
        )
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn unarchiver(&self) -> Option<Unarchiver> {
        self.unarchiver
    }

    /// Check if target binary is on search path.
    pub fn is_installed(&self) -> bool {
        which::which(&self.target_name).is_ok()
    }

    /// Download raw content, showing progress on stderr.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::Http`] if request fails.
    /// - Return [`ReleaseError::Status`] if response is not 200 OK.
    #[instrument(skip(self, client), fields(url = %self.url), level = "debug")]
    pub async fn fetch(&self, client: &Client) -> Result<Vec<u8>> {
        let mut response = client.get(self.url.clone()).send().await?;
        if response.status() != StatusCode::OK {
            return Err(ReleaseError::Status {
                url: self.url.to_string(),
                status: response.status(),
            });
        }

        let progress = match response.content_length() {
            Some(length) => ProgressBar::new(length).with_style(
                ProgressStyle::with_template("{msg} {wide_bar} {bytes}/{total_bytes}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            ),
            None => ProgressBar::new_spinner(),
        };
        progress.set_message(self.target_name.clone());

        let mut content = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            progress.inc(chunk.len() as u64);
            content.extend_from_slice(&chunk);
        }
        progress.finish_and_clear();
        debug!("fetched {} bytes", content.len());

        Ok(content)
    }

    /// Turn fetched content into binary content.
    ///
    /// # Errors
    ///
    /// - Return extraction errors of [`Unarchiver::extract`].
    pub fn process(&self, content: Vec<u8>) -> Result<Vec<u8>> {
        match self.unarchiver {
            Some(unarchiver) => unarchiver.extract(&content, &self.source_name),
            None => Ok(content),
        }
    }

    /// Fetch binary and install it into destination directory.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::NotADirectory`] if destination is not a
    ///   directory.
    /// - Return any error of [`Remote::fetch`], [`Remote::process`], or
    ///   [`install_binary`].
    pub async fn install(&self, client: &Client, dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dest_dir = dest_dir.as_ref();
        if !dest_dir.is_dir() {
            return Err(ReleaseError::NotADirectory {
                path: dest_dir.to_path_buf(),
            });
        }
        let dest_dir = dest_dir
            .canonicalize()
            .map_err(|source| ReleaseError::Install {
                source,
                path: dest_dir.to_path_buf(),
            })?;

        if !on_search_path(&dest_dir) {
            eprintln!(
                "{}",
                messages::warning(format!(
                    "destination directory {} is not on PATH",
                    messages::path(dest_dir.display())
                ))
            );
        }

        let content = self.process(self.fetch(client).await?)?;
        install_binary(&content, dest_dir.join(&self.target_name))
    }
}

/// Asset of a GitHub release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRelease {
    pub repository: String,
    pub target_name: String,
    pub file: String,
    pub source_name: Option<String>,
    pub version: Option<String>,
    pub tag: Option<String>,
    pub unarchiver: Option<Unarchiver>,
}

impl GitHubRelease {
    /// Construct new release asset description.
    pub fn new(
        repository: impl Into<String>,
        target_name: impl Into<String>,
        file: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            target_name: target_name.into(),
            file: file.into(),
            source_name: None,
            version: None,
            tag: None,
            unarchiver: None,
        }
    }

    /// Resolve asset into remote binary.
    ///
    /// Looks up the latest release when no version is set. Archive format
    /// is picked from the file name unless set explicitly.
    ///
    /// # Errors
    ///
    /// - Return errors of [`latest_version`] and [`Remote::new`].
    pub async fn resolve(&self, client: &Client, os: &str, arch: &str) -> Result<Remote> {
        let version = match &self.version {
            Some(version) => version.clone(),
            None => latest_version(client, &self.repository).await?,
        };

        let vars = PatternVars {
            name: self
                .source_name
                .clone()
                .unwrap_or_else(|| self.target_name.clone()),
            version,
            os: os.into(),
            arch: arch.into(),
            repository: self.repository.clone(),
        };

        let url = self.download_url(&vars);
        let file = vars.fill(&self.file);
        let unarchiver = self.unarchiver.or_else(|| Unarchiver::from_file_name(&file));
        let source_name = self.source_name.as_deref().map(|name| vars.fill(name));
        info!("resolved {} to {url}", self.repository);

        Remote::new(&self.target_name, &url, source_name, unarchiver)
    }

    /// Download URL of asset for placeholder values.
    pub fn download_url(&self, vars: &PatternVars) -> String {
        let tag = match &self.tag {
            Some(tag) => vars.fill(tag),
            None => vars.version.clone(),
        };

        format!(
            "{GITHUB}/{}/releases/download/{tag}/{}",
            self.repository,
            vars.fill(&self.file)
        )
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    tag_name: String,
}

/// Build HTTP client for release downloads.
///
/// # Errors
///
/// - Return [`ReleaseError::Http`] if client cannot be built.
pub fn client() -> Result<Client> {
    Ok(Client::builder().user_agent(USER_AGENT).build()?)
}

/// Tag of latest release of GitHub repository.
///
/// # Errors
///
/// - Return [`ReleaseError::Http`] if request fails.
/// - Return [`ReleaseError::Status`] if repository has no latest release.
pub async fn latest_version(client: &Client, repository: &str) -> Result<String> {
    let url = format!("{GITHUB_API}/repos/{repository}/releases/latest");
    let response = client
        .get(&url)
        .header("Accept", "application/vnd.github+json")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(ReleaseError::Status {
            url,
            status: response.status(),
        });
    }

    let release: ReleaseInfo = response.json().await?;
    debug!("latest release of {repository} is {}", release.tag_name);

    Ok(release.tag_name)
}

/// Write binary content to target, replacing it in one step.
///
/// # Errors
///
/// - Return [`ReleaseError::Install`] if content cannot be written.
/// - Return [`ReleaseError::Persist`] if target cannot be replaced.
pub fn install_binary(content: &[u8], target: impl AsRef<Path>) -> Result<PathBuf> {
    let target = target.as_ref();
    let dir = target.parent().unwrap_or(Path::new("."));
    let install_error = |source| ReleaseError::Install {
        source,
        path: target.to_path_buf(),
    };

    let mut file = NamedTempFile::new_in(dir).map_err(install_error)?;
    file.write_all(content).map_err(install_error)?;
    set_permissions(file.path(), Permissions::from_mode(binary_mode(target)))
        .map_err(install_error)?;
    file.persist(target)?;
    info!("installed {:?}", target.display());

    Ok(target.to_path_buf())
}

/// Permissions of installed binary at target.
pub fn binary_mode(target: &Path) -> u32 {
    match home_dir() {
        Ok(home) if target.starts_with(&home) => 0o700,
        _ => 0o755,
    }
}

fn on_search_path(dir: &Path) -> bool {
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|path| path == dir))
        .unwrap_or(false)
}

/// Remote binary error types.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unknown archive format {name:?}, expected tar, tar.gz, or zip")]
    UnknownArchive { name: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("expected a 200 OK response from {url}, got {status}")]
    Status { url: String, status: StatusCode },

    #[error("{:?} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    #[error("archive has no file {member:?}")]
    MemberNotFound { member: String },

    #[error("failed to read archive")]
    Archive(#[source] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error("failed to install {:?}", path.display())]
    Install {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),
}

/// Friendly result alias :3
pub type Result<T, E = ReleaseError> = std::result::Result<T, E>;
