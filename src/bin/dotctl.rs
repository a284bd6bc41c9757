// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotctl::{
    context::HostContext,
    installer::{reconcile, Installer, InstallerKind},
    manager::{Launch, Manager, SelfExec},
    messages,
    packages::Packages,
    path::{
        dotfiles_dir, dotsecrets_dir, home_dir, tagsrc_path, DOTFILES_PATH, DOTSECRETS_PATH, TAGSRC,
    },
    platform,
    privilege::{elevate, is_root, Invoker, Reexec},
    release::{self, GitHubRelease, PatternVars, Remote, Unarchiver},
    script::{ScriptError, SetupScript},
};

use anyhow::{anyhow, bail, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::{
    io,
    path::{Path, PathBuf},
    process::exit,
    str::FromStr,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  dotctl [options] <dotctl-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Run command, reporting whether every contained unit of work succeeded.
    async fn run(self) -> Result<bool> {
        match self.command {
            Command::Files(opts) => run_tree(Tree::Files, opts.action).await,
            Command::Secrets(opts) => run_tree(Tree::Secrets, opts.action).await,
            Command::Install(opts) => run_install(&[Tree::Files, Tree::Secrets], opts).await,
            Command::Setup => run_setup(&[Tree::Files, Tree::Secrets]),
            Command::Run(opts) => run_script(opts),
            Command::Packages(opts) => run_packages(opts),
            Command::Release(opts) => run_release(opts).await,
            Command::ExecScript(opts) => run_exec_script(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Link or set up dotfiles tree.
    #[command(override_usage = "dotctl files <install|setup> [options]")]
    Files(TreeOptions),

    /// Link or set up secrets tree.
    #[command(override_usage = "dotctl secrets <install|setup> [options]")]
    Secrets(TreeOptions),

    /// Link packages of dotfiles tree, then secrets tree.
    #[command(override_usage = "dotctl install [options]")]
    Install(InstallOptions),

    /// Run setup scripts of dotfiles tree, then secrets tree.
    #[command(override_usage = "dotctl setup")]
    Setup,

    /// Run single setup script as root with host context of dotfiles tree.
    #[command(override_usage = "dotctl run <script>")]
    Run(ScriptOptions),

    /// Install or remove packages of a package list file.
    #[command(override_usage = "dotctl packages [options] <variant> <file>")]
    Packages(PackagesOptions),

    /// Install binary from a URL or a GitHub release.
    #[command(override_usage = "dotctl release [options] <target_name>")]
    Release(ReleaseOptions),

    /// Run single setup script through its guard.
    #[command(name = "exec-script", hide = true)]
    ExecScript(ScriptOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct TreeOptions {
    #[command(subcommand)]
    pub action: TreeAction,
}

#[derive(Debug, Clone, Subcommand)]
enum TreeAction {
    /// Link every package into target directory.
    Install(InstallOptions),

    /// Run every setup script.
    Setup,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InstallOptions {
    /// Directory to link packages into instead of the home directory.
    #[arg(short, long, value_name = "dir")]
    pub target: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ScriptOptions {
    /// Path to setup script.
    #[arg(required = true, value_name = "script")]
    pub script: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PackagesOptions {
    /// Installer variant, e.g., brew-cask or cargo.
    #[arg(required = true, value_name = "variant", value_parser = InstallerKind::from_str)]
    pub variant: InstallerKind,

    /// Package list file name under packages directory.
    #[arg(required = true, value_name = "file")]
    pub file: PathBuf,

    /// Run package manager as invoking user when root.
    #[arg(long)]
    pub as_user: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about, group(ArgGroup::new("source").required(true)))]
struct ReleaseOptions {
    /// Name of installed binary.
    #[arg(required = true, value_name = "target_name")]
    pub target_name: String,

    /// Download binary from URL pattern.
    #[arg(long, group = "source", value_name = "url")]
    pub url: Option<String>,

    /// Download binary from release of GitHub repository.
    #[arg(long, group = "source", requires = "file", value_name = "owner/repo")]
    pub repository: Option<String>,

    /// Release asset file name pattern.
    #[arg(long, value_name = "pattern")]
    pub file: Option<String>,

    /// Release version, latest release by default.
    #[arg(long, value_name = "version")]
    pub version: Option<String>,

    /// Release tag pattern, version by default.
    #[arg(long, value_name = "pattern")]
    pub tag: Option<String>,

    /// Name of binary inside archive, target name by default.
    #[arg(long, value_name = "name")]
    pub source_name: Option<String>,

    /// Archive format of download, picked from its file name by default.
    #[arg(long, value_name = "tar|tar.gz|zip", value_parser = Unarchiver::from_str)]
    pub archive: Option<Unarchiver>,

    /// Directory to install binary into, ~/.local/bin by default.
    #[arg(long, value_name = "dir")]
    pub dest: Option<PathBuf>,

    /// Install even if binary is already on search path.
    #[arg(short, long)]
    pub force: bool,
}

/// Managed file trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tree {
    Files,
    Secrets,
}

impl Tree {
    fn root(self) -> Result<PathBuf> {
        let root = match self {
            Tree::Files => dotfiles_dir()?,
            Tree::Secrets => dotsecrets_dir()?,
        };

        if !root.is_dir() {
            bail!("{} does not exist", root.display());
        }

        Ok(root)
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(io::stderr);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_default();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match run().await {
        Ok(true) => exit(0),
        Ok(false) => exit(1),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

async fn run() -> Result<bool> {
    Cli::parse().run().await
}

async fn run_tree(tree: Tree, action: TreeAction) -> Result<bool> {
    match action {
        TreeAction::Install(opts) => run_install(&[tree], opts).await,
        TreeAction::Setup => run_setup(&[tree]),
    }
}

async fn run_install(trees: &[Tree], opts: InstallOptions) -> Result<bool> {
    let mut success = true;
    for tree in trees {
        let manager = Manager::new(tree.root()?)?;
        let summary = manager
            .install(opts.target.as_deref(), &mut io::stdout(), &mut io::stderr())
            .await?;
        info!(
            "linked {} of {} packages in {}",
            summary.linked.len(),
            summary.linked.len() + summary.failed.len(),
            manager.root().display()
        );
        success &= summary.is_success();
    }

    Ok(success)
}

fn run_setup(trees: &[Tree]) -> Result<bool> {
    let managers = trees
        .iter()
        .map(|tree| -> Result<Manager> { Ok(Manager::new(tree.root()?)?) })
        .collect::<Result<Vec<_>>>()?;
    let context = managers
        .first()
        .map(|manager| manager.context().clone())
        .ok_or_else(|| anyhow!("no managed file tree given"))?;
    elevate(&context, &reexec()?)?;

    let launcher = SelfExec::current()?;
    let mut success = true;
    for manager in managers {
        let summary = manager.setup(&launcher)?;
        if !summary.is_success() {
            error!(
                "{} of {} setup scripts failed in {}",
                summary.failed.len(),
                summary.ran.len(),
                manager.root().display()
            );
        }
        success &= summary.is_success();
    }

    Ok(success)
}

fn run_script(opts: ScriptOptions) -> Result<bool> {
    let context = HostContext::discover(Tree::Files.root()?)?;
    elevate(&context, &reexec()?)?;
    context.publish();

    let status = SelfExec::current()?.launch(&opts.script)?;
    Ok(status.success())
}

fn run_exec_script(opts: ScriptOptions) -> Result<bool> {
    let script = SetupScript::load(&opts.script)?;
    match script.run() {
        Ok(()) => Ok(true),
        Err(ScriptError::Failed { .. }) => Ok(false),
        Err(error) => Err(error.into()),
    }
}

fn run_packages(opts: PackagesOptions) -> Result<bool> {
    let context = ambient_context()?;
    let mut installer = Installer::new(opts.variant)?;
    if opts.as_user && is_root() {
        installer = installer.as_user(Invoker::from_env()?);
    }

    let packages = Packages::for_context(&context, &opts.file);
    if packages.sources().is_empty() {
        bail!(
            "no package list {} under {}",
            opts.file.display(),
            context.packages_directory().display()
        );
    }

    let tally = reconcile(&installer, packages.entries()?, &mut io::stdout())?;
    info!(
        "checked {} packages, changed {}, failed {}",
        tally.checked, tally.changed, tally.failed
    );

    Ok(tally.failed == 0)
}

async fn run_release(opts: ReleaseOptions) -> Result<bool> {
    let context = HostContext::from_env();
    let os = non_empty(context.operating_system()).unwrap_or_else(platform::system);
    let arch = non_empty(context.architecture()).unwrap_or_else(platform::machine);
    let client = release::client()?;

    let remote = match (&opts.url, &opts.repository, &opts.file) {
        (Some(url), _, _) => {
            let vars = PatternVars {
                name: opts.source_name.clone().unwrap_or_else(|| opts.target_name.clone()),
                version: opts.version.clone().unwrap_or_default(),
                os,
                arch,
                repository: String::new(),
            };
            Remote::from_pattern(
                &opts.target_name,
                url,
                &vars,
                opts.source_name.as_deref(),
                opts.archive,
            )?
        }
        (None, Some(repository), Some(file)) => {
            let mut asset = GitHubRelease::new(repository, &opts.target_name, file);
            asset.source_name = opts.source_name.clone();
            asset.version = opts.version.clone();
            asset.tag = opts.tag.clone();
            asset.unarchiver = opts.archive;
            asset.resolve(&client, &os, &arch).await?
        }
        _ => bail!("either --url, or --repository with --file is required"),
    };

    if !opts.force && remote.is_installed() {
        println!(
            "{}",
            messages::info(format!("{} is already installed", remote.target_name()))
        );
        return Ok(true);
    }

    let dest = match opts.dest {
        Some(dest) => dest,
        None => home_dir()?.join(".local/bin"),
    };
    let path = remote.install(&client, &dest).await?;
    println!(
        "{}",
        messages::success(format!(
            "installed {} to {}",
            messages::bin(remote.target_name()),
            messages::path(path.display())
        ))
    );

    Ok(true)
}

/// Re-execution of current command carrying tree locations across sudo.
fn reexec() -> Result<Reexec> {
    Ok(Reexec::current()?
        .env(DOTFILES_PATH, lossy(&dotfiles_dir()?))
        .env(DOTSECRETS_PATH, lossy(&dotsecrets_dir()?))
        .env(TAGSRC, lossy(&tagsrc_path()?)))
}

/// Host context handed down by a parent, or discovered for dotfiles tree.
fn ambient_context() -> Result<HostContext> {
    let context = HostContext::from_env();
    if !context.packages_directory().as_os_str().is_empty() {
        return Ok(context);
    }

    Ok(HostContext::discover(Tree::Files.root()?)?)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}

fn lossy(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
