//! Deployment orchestration.
//!
//! A run goes through these steps in order:
//!
//! 1. [`ProjectRoot::resolve`] canonicalizes the local root, then
//!    [`Workspace::load`] loads the exclusion patterns. The process working
//!    directory is never changed.
//! 2. A [`Transport`] session is opened.
//! 3. [`transfer_tree`] walks the root and, for each file that is not
//!    excluded, creates its remote directory, copies it and optionally marks
//!    it executable. Files are handled one at a time in walk order.
//! 4. If a program is configured, [`execute_program`] starts it and relays
//!    its streams until its output closes.
//! 5. The session is closed.
//!
//! Every transferred file lands at `~/<root basename>/<relative path>`.

use std::fmt;
use std::io::BufRead;
use std::path::PathBuf;

use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use super::client::ConnectParams;
use super::config::DeployConfig;
use super::error::DeployError;
use super::exclude::{load_exclusion_set, walker_form};
use super::pattern::PatternSet;
use super::relay::{LocalTerminal, relay_process};
use super::transport::{RemotePath, SshTransport, Transport, chmod_command, mkdir_command};
use super::walk::walk;

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploySummary {
    /// Walker-form paths that were copied, in transfer order
    pub sent: Vec<String>,
    /// Walker-form paths skipped by an exclusion pattern
    pub excluded: Vec<String>,
    /// Walker-form paths marked executable on the remote host
    pub marked_executable: Vec<String>,
    /// Exit status of the executed program, when it was known
    pub exit_status: Option<u32>,
}

/// Local side of a deployment, resolved before any connection is made.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Canonical local root
    pub root: PathBuf,
    /// Last component of `root`; names the remote project directory
    pub basename: String,
    pub exclusions: PatternSet,
    pub executable: PatternSet,
}

/// The canonical local root and the name it gives the remote project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    pub path: PathBuf,
    pub basename: String,
}

impl ProjectRoot {
    /// Canonicalize the configured local root. Nothing is written.
    pub fn resolve(config: &DeployConfig) -> Result<Self, DeployError> {
        let path = std::fs::canonicalize(&config.local_root).map_err(|source| {
            DeployError::LocalRoot {
                path: config.local_root.clone(),
                source,
            }
        })?;
        if !path.is_dir() {
            return Err(DeployError::LocalRoot {
                path,
                source: std::io::Error::other("not a directory"),
            });
        }

        let basename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                DeployError::Config(format!(
                    "{} has no usable directory name",
                    path.display()
                ))
            })?;

        Ok(Self { path, basename })
    }
}

impl Workspace {
    /// Resolve the local root and load its exclusion file.
    pub fn prepare(config: &DeployConfig) -> Result<Self, DeployError> {
        Self::load(ProjectRoot::resolve(config)?, config)
    }

    /// Load the exclusion file of `project`, creating it with defaults if
    /// needed.
    pub fn load(project: ProjectRoot, config: &DeployConfig) -> Result<Self, DeployError> {
        let ProjectRoot { path: root, basename } = project;

        let exclude_path = root.join(&config.exclude_file);
        let exclusions = load_exclusion_set(&exclude_path, &walker_form(&config.exclude_file))?;
        let executable = PatternSet::new(config.executable.iter().cloned());

        debug!(
            "Workspace {}: excluding {:?}, executable {:?}",
            root.display(),
            exclusions.iter().collect::<Vec<_>>(),
            executable.iter().collect::<Vec<_>>()
        );
        Ok(Self {
            root,
            basename,
            exclusions,
            executable,
        })
    }

    /// Remote location of a walker-form path.
    pub fn remote(&self, relative: &str) -> RemotePath {
        RemotePath::under(&self.basename, relative)
    }
}

/// Progress lines on local stdout, printed only when console output is on.
#[derive(Debug, Clone, Copy)]
struct Progress {
    enabled: bool,
}

impl Progress {
    fn line(&self, args: fmt::Arguments<'_>) {
        if self.enabled {
            println!("{args}");
        }
    }
}

/// Path as shown to the user: walker form without the leading `./`.
fn shown(relative: &str) -> &str {
    relative.strip_prefix("./").unwrap_or(relative)
}

/// Turn a remote exit status into an error when checking is enabled.
fn check_status(
    config: &DeployConfig,
    command: impl FnOnce() -> String,
    status: Option<u32>,
) -> Result<(), DeployError> {
    if !config.check_exit_status || status == Some(0) {
        return Ok(());
    }
    Err(DeployError::RemoteExit {
        command: command(),
        status,
    })
}

/// Copy every non-excluded file below the workspace root.
pub async fn transfer_tree<T>(
    transport: &mut T,
    workspace: &Workspace,
    config: &DeployConfig,
) -> Result<DeploySummary, DeployError>
where
    T: Transport + ?Sized,
{
    let progress = Progress {
        enabled: config.print_console,
    };
    let mut summary = DeploySummary::default();

    for entry in walk(&workspace.root)? {
        if let Some(pattern) = workspace.exclusions.first_match(&entry.relative) {
            debug!("{} excluded by `{}`", entry.relative, pattern);
            progress.line(format_args!("Excluding {} .", shown(&entry.relative)));
            summary.excluded.push(entry.relative);
            continue;
        }

        progress.line(format_args!("Sending {} ...", shown(&entry.relative)));

        let dir = workspace.remote(&entry.subdir);
        let status = transport.ensure_dir(&dir).await?;
        check_status(config, || mkdir_command(&dir), status)?;

        let destination = workspace.remote(&entry.relative);
        transport.copy_file(&entry.local, &destination).await?;
        progress.line(format_args!("Sent"));

        if workspace.executable.matches(&entry.relative) {
            let status = transport.mark_executable(&destination).await?;
            check_status(config, || chmod_command(&destination), status)?;
            progress.line(format_args!("{} marked as executable.", destination));
            summary.marked_executable.push(entry.relative.clone());
        }

        summary.sent.push(entry.relative);
    }

    info!(
        "Transferred {} file(s), excluded {}",
        summary.sent.len(),
        summary.excluded.len()
    );
    Ok(summary)
}

/// Start `program` and relay its streams until its output closes.
///
/// A relative `program` is resolved against the remote project root, an
/// absolute one is run as given.
///
/// Without exit-status checking the status is only reported if it already
/// arrived when the relays finish. With checking enabled it is awaited and a
/// non-zero or missing status is an error.
pub async fn execute_program<T, O, E, I>(
    transport: &mut T,
    workspace: &Workspace,
    config: &DeployConfig,
    program: &str,
    terminal: LocalTerminal<O, E, I>,
) -> Result<Option<u32>, DeployError>
where
    T: Transport + ?Sized,
    O: AsyncWrite + Send + Unpin + 'static,
    E: AsyncWrite + Send + Unpin + 'static,
    I: BufRead + Send + 'static,
{
    let progress = Progress {
        enabled: config.print_console,
    };
    progress.line(format_args!("\nExecuting {} ...\n", program));

    let remote = workspace.remote(program);
    let process = transport.execute(&remote).await?;
    let (report, exit_status) = relay_process(process, &config.redirect, terminal).await;
    debug!(
        "Relayed {} stdout and {} stderr byte(s)",
        report.stdout_bytes, report.stderr_bytes
    );

    if !config.check_exit_status {
        if !exit_status.is_finished() {
            return Ok(None);
        }
        return Ok(exit_status.await.ok().flatten());
    }

    let status = exit_status.await.map_err(|e| DeployError::Io(e.into()))?;
    check_status(config, || remote.to_string(), status)?;
    Ok(status)
}

/// Transfer the tree and run the configured program over an open session.
pub async fn deploy<T, O, E, I>(
    transport: &mut T,
    workspace: &Workspace,
    config: &DeployConfig,
    terminal: LocalTerminal<O, E, I>,
) -> Result<DeploySummary, DeployError>
where
    T: Transport + ?Sized,
    O: AsyncWrite + Send + Unpin + 'static,
    E: AsyncWrite + Send + Unpin + 'static,
    I: BufRead + Send + 'static,
{
    let mut summary = transfer_tree(transport, workspace, config).await?;

    if let Some(program) = &config.execute_file {
        summary.exit_status =
            execute_program(transport, workspace, config, program, terminal).await?;
    }

    Progress {
        enabled: config.print_console,
    }
    .line(format_args!("\nFinished."));
    Ok(summary)
}

/// Run a complete deployment against the configured host.
pub async fn run(config: &DeployConfig) -> Result<DeploySummary, DeployError> {
    let progress = Progress {
        enabled: config.print_console,
    };

    let project = ProjectRoot::resolve(config)?;
    progress.line(format_args!("CD {}", project.path.display()));
    let workspace = Workspace::load(project, config)?;

    progress.line(format_args!("Starting ssh ..."));
    let params = ConnectParams {
        address: config.hostname.clone(),
        username: config.username.clone(),
        password: config.password.clone(),
        timeout: config.connect_timeout,
        compress: config.compression,
        known_hosts: config.known_hosts.clone(),
    };
    progress.line(format_args!(
        "Connecting to {}@{} ...",
        config.username, config.hostname
    ));
    let mut transport = SshTransport::connect(&params, config.command_timeout).await?;

    let outcome = deploy(&mut transport, &workspace, config, LocalTerminal::system()).await;

    if let Err(e) = transport.close().await {
        warn!("Failed to close SSH session: {}", e);
    }
    outcome
}
