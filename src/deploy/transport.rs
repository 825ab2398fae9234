//! Transport session: one authenticated SSH connection and the operations a
//! deployment performs over it.
//!
//! # Architecture
//!
//! - [`Transport`]: the operations the orchestrator needs. Implemented by
//!   [`SshTransport`] and by recording fakes in tests.
//! - [`RemotePath`]: a path below the remote home directory.
//! - [`RemoteProcess`]: the three streams and exit status of a remote program
//!   started under a pseudo-terminal.
//!
//! `ensure_dir` and `mark_executable` report the remote exit status but never
//! interpret it; deciding whether a failure matters is up to the caller.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use russh::{ChannelMsg, Disconnect, client};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::{ConnectParams, connect_to_ssh, run_remote_command};
use super::error::DeployError;
use super::scp::{self, ScpFailure};
use super::session::SshClientHandler;

/// Capacity of the in-memory pipes between the channel pump and the relays.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Terminal type requested for executed programs.
const PTY_TERM: &str = "vt100";
const PTY_COLUMNS: u32 = 80;
const PTY_ROWS: u32 = 24;

/// A path on the remote host, normally below the user's home directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemotePath {
    path: String,
    in_home: bool,
}

impl RemotePath {
    /// Build `~/<root>/<relative>` from a walker-form relative path.
    ///
    /// Leading `./` segments are dropped; `.` maps to the root itself. An
    /// absolute `relative` replaces the root entirely and is used as given.
    pub fn under(root: &str, relative: &str) -> Self {
        if relative.starts_with('/') {
            return Self {
                path: relative.to_string(),
                in_home: false,
            };
        }

        let mut path = root.trim_end_matches('/').to_string();
        for segment in relative.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            path.push('/');
            path.push_str(segment);
        }
        Self {
            path,
            in_home: true,
        }
    }

    /// The path without the `~/` prefix of home-relative paths.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map_or(self.path.as_str(), |(_, name)| name)
    }

    /// Render for a remote shell: `~/` stays unquoted so the shell expands
    /// it, the rest is quoted.
    pub fn shell_arg(&self) -> String {
        if self.in_home {
            format!("~/{}", shell_words::quote(&self.path))
        } else {
            shell_words::quote(&self.path).into_owned()
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.in_home {
            write!(f, "~/{}", self.path)
        } else {
            f.write_str(&self.path)
        }
    }
}

/// A remote program running under a pseudo-terminal.
pub struct RemoteProcess {
    /// Writes reach the program's stdin
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Ends when the program closes its stdout
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Ends when the program closes its stderr
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    /// Resolves to the exit status once the channel closes
    pub exit_status: JoinHandle<Option<u32>>,
}

/// Operations a deployment performs on the remote host.
#[async_trait]
pub trait Transport: Send {
    /// Run `mkdir -p` for `dir`, returning the remote exit status.
    async fn ensure_dir(&mut self, dir: &RemotePath) -> Result<Option<u32>, DeployError>;

    /// Copy `local` to `destination`, overwriting it.
    async fn copy_file(&mut self, local: &Path, destination: &RemotePath)
    -> Result<(), DeployError>;

    /// Run `chmod u+x` for `file`, returning the remote exit status.
    async fn mark_executable(&mut self, file: &RemotePath) -> Result<Option<u32>, DeployError>;

    /// Start `program` under a pseudo-terminal without waiting for it.
    async fn execute(&mut self, program: &RemotePath) -> Result<RemoteProcess, DeployError>;

    /// End the session.
    async fn close(&mut self) -> Result<(), DeployError>;
}

/// Remote `mkdir -p` command for `dir`.
pub fn mkdir_command(dir: &RemotePath) -> String {
    format!("mkdir -p {}", dir.shell_arg())
}

/// Remote `chmod u+x` command for `file`.
pub fn chmod_command(file: &RemotePath) -> String {
    format!("chmod u+x {}", file.shell_arg())
}

/// [`Transport`] over a russh session.
pub struct SshTransport {
    handle: client::Handle<SshClientHandler>,
    command_timeout: Duration,
}

impl SshTransport {
    /// Connect and authenticate. Any failure is fatal; there is no retry.
    pub async fn connect(
        params: &ConnectParams,
        command_timeout: Duration,
    ) -> Result<Self, DeployError> {
        let handle = connect_to_ssh(params).await?;
        Ok(Self {
            handle,
            command_timeout,
        })
    }

    async fn housekeeping(&self, command: &str) -> Result<Option<u32>, DeployError> {
        let output = run_remote_command(&self.handle, command, self.command_timeout).await?;
        if output.timed_out {
            warn!(
                "`{}` did not finish within {:?}",
                command, self.command_timeout
            );
        }
        if !output.stdout.is_empty() {
            debug!("`{}` stdout: {}", command, output.stdout.trim_end());
        }
        if !output.stderr.is_empty() {
            debug!("`{}` stderr: {}", command, output.stderr.trim_end());
        }
        Ok(output.exit_status)
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn ensure_dir(&mut self, dir: &RemotePath) -> Result<Option<u32>, DeployError> {
        self.housekeeping(&mkdir_command(dir)).await
    }

    async fn copy_file(
        &mut self,
        local: &Path,
        destination: &RemotePath,
    ) -> Result<(), DeployError> {
        let read_error = |source| DeployError::ReadFile {
            path: local.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::open(local).await.map_err(read_error)?;
        let metadata = file.metadata().await.map_err(read_error)?;

        let mut channel = self.handle.channel_open_session().await?;
        channel
            .exec(true, scp::sink_command(&destination.shell_arg()))
            .await?;
        let mut stream = Box::pin(channel.into_stream());

        scp::send_file(
            &mut stream,
            &mut file,
            metadata.len(),
            scp::local_mode(&metadata),
            destination.file_name(),
        )
        .await
        .map_err(|failure: ScpFailure| DeployError::Scp {
            destination: destination.to_string(),
            message: failure.to_string(),
        })?;

        debug!("Copied {} to {}", local.display(), destination);
        Ok(())
    }

    async fn mark_executable(&mut self, file: &RemotePath) -> Result<Option<u32>, DeployError> {
        self.housekeeping(&chmod_command(file)).await
    }

    async fn execute(&mut self, program: &RemotePath) -> Result<RemoteProcess, DeployError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel
            .request_pty(true, PTY_TERM, PTY_COLUMNS, PTY_ROWS, 0, 0, &[])
            .await?;
        channel.exec(true, program.shell_arg()).await?;
        info!("Started remote program {}", program);

        let (stdout_tx, stdout_rx) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_tx, stderr_rx) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdin_tx, stdin_rx) = tokio::io::duplex(PIPE_CAPACITY);

        let exit_status = tokio::spawn(pump_channel(channel, stdout_tx, stderr_tx, stdin_rx));

        Ok(RemoteProcess {
            stdin: Box::new(stdin_tx),
            stdout: Box::new(stdout_rx),
            stderr: Box::new(stderr_rx),
            exit_status,
        })
    }

    async fn close(&mut self) -> Result<(), DeployError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await?;
        Ok(())
    }
}

/// Own the exec channel of a running program: fan its output out to the
/// stdout/stderr pipes and forward the stdin pipe to it.
///
/// Output for a pipe whose reader is gone is discarded. The pipes are closed
/// on channel EOF; the task ends when the channel closes and yields the exit
/// status, if the server sent one.
async fn pump_channel(
    mut channel: russh::Channel<client::Msg>,
    stdout: DuplexStream,
    stderr: DuplexStream,
    mut stdin: DuplexStream,
) -> Option<u32> {
    let mut stdout = Some(stdout);
    let mut stderr = Some(stderr);
    let mut stdin_open = true;
    let mut exit_status = None;
    let mut buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => forward(&mut stdout, &data).await,
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    // ext == 1 is stderr in SSH protocol
                    if ext == 1 {
                        forward(&mut stderr, &data).await;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                    exit_status = Some(status);
                }
                Some(ChannelMsg::Eof) => {
                    stdout = None;
                    stderr = None;
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            read = stdin.read(&mut buf), if stdin_open => match read {
                Ok(0) | Err(_) => {
                    stdin_open = false;
                    let _ = channel.eof().await;
                }
                Ok(n) => {
                    if channel.data(&buf[..n]).await.is_err() {
                        stdin_open = false;
                    }
                }
            },
        }
    }

    let _ = channel.close().await;
    debug!("Remote program channel closed with {:?}", exit_status);
    exit_status
}

async fn forward(pipe: &mut Option<DuplexStream>, data: &[u8]) {
    if let Some(writer) = pipe.as_mut()
        && writer.write_all(data).await.is_err()
    {
        // Reader dropped: nobody relays this stream.
        *pipe = None;
    }
}
