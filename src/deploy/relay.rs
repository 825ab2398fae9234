//! Stream relay between a remote program and the local terminal.
//!
//! Up to three independent one-directional copy loops run while a remote
//! program executes, one per enabled direction:
//!
//! - **stdout**: remote stdout to local stdout, line by line
//! - **stderr**: remote stderr to local stderr, line by line
//! - **stdin**: local input to remote stdin, line by line
//!
//! There is no ordering between stdout and stderr lines at the destination.
//!
//! # Cancellation
//!
//! The stdout and stderr relays end on their own when the remote streams
//! reach EOF and are awaited. Local input has no such end, so the stdin relay
//! is cancelled once the output relays finish: a [`CancellationToken`] is
//! checked at every line boundary and the line channel to the forwarder is
//! closed. The thread reading local input may still be blocked in a read and
//! only notices when that read returns; it is detached rather than joined.
//! This shutdown is best-effort by nature.

use std::io::BufRead;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::RedirectOptions;
use super::transport::RemoteProcess;

/// Lines of local input buffered between the reader thread and the forwarder.
const STDIN_LINE_BUFFER: usize = 16;

/// Local side of the relay.
pub struct LocalTerminal<O, E, I> {
    pub stdout: O,
    pub stderr: E,
    pub stdin: I,
}

impl LocalTerminal<tokio::io::Stdout, tokio::io::Stderr, std::io::BufReader<std::io::Stdin>> {
    /// The process's own standard streams.
    pub fn system() -> Self {
        Self {
            stdout: tokio::io::stdout(),
            stderr: tokio::io::stderr(),
            stdin: std::io::BufReader::new(std::io::stdin()),
        }
    }
}

/// What the relay did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    /// Whether the stdin relay was started at all
    pub stdin_started: bool,
}

/// Copy `reader` to `writer` one line at a time until EOF.
///
/// Each line is flushed as soon as it is written so interactive output shows
/// up immediately. A final line without a newline is copied too.
pub async fn relay_lines<R, W>(reader: R, mut writer: W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut total = 0u64;

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&line).await?;
        writer.flush().await?;
        total += n as u64;
    }

    Ok(total)
}

/// Handle to a running stdin relay.
pub struct StdinRelay {
    token: CancellationToken,
    forwarder: tokio::task::JoinHandle<u64>,
}

impl StdinRelay {
    /// Start relaying `input` to `remote`.
    ///
    /// `input` is read on a dedicated OS thread because local input only
    /// offers blocking reads.
    pub fn spawn<I, W>(input: I, remote: W, token: CancellationToken) -> Self
    where
        I: BufRead + Send + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(STDIN_LINE_BUFFER);

        let reader_token = token.clone();
        std::thread::spawn(move || read_input_lines(input, tx, reader_token));

        let forwarder = tokio::spawn(forward_input_lines(rx, remote, token.clone()));
        Self { token, forwarder }
    }

    /// Cancel the relay and wait for the forwarder to stop.
    ///
    /// Returns the number of bytes forwarded. The input thread is left to
    /// exit on its own after its current read returns.
    pub async fn stop(self) -> u64 {
        self.token.cancel();
        match self.forwarder.await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("stdin relay task failed: {}", e);
                0
            }
        }
    }
}

fn read_input_lines<I: BufRead>(
    mut input: I,
    tx: mpsc::Sender<Vec<u8>>,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            break;
        }
        let mut line = Vec::new();
        match input.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Local input closed: {}", e);
                break;
            }
        }
        if token.is_cancelled() || tx.blocking_send(line).is_err() {
            break;
        }
    }
    debug!("stdin reader thread finished");
}

async fn forward_input_lines<W>(
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut remote: W,
    token: CancellationToken,
) -> u64
where
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    loop {
        let line = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        if remote.write_all(&line).await.is_err() || remote.flush().await.is_err() {
            break;
        }
        total += line.len() as u64;
    }
    // Closing the receiver makes the reader thread stop at its next line.
    rx.close();
    total
}

/// Relay the streams of `process` to and from `terminal`.
///
/// Returns once the enabled stdout/stderr relays have reached EOF; with both
/// disabled it returns immediately. The stdin relay, if enabled, is cancelled
/// at that point. The remote stdin is held open until then even when its
/// relay is disabled, so the program never sees a spurious EOF.
///
/// The exit status handle of `process` is returned untouched.
pub async fn relay_process<O, E, I>(
    process: RemoteProcess,
    options: &RedirectOptions,
    terminal: LocalTerminal<O, E, I>,
) -> (RelayReport, tokio::task::JoinHandle<Option<u32>>)
where
    O: AsyncWrite + Send + Unpin + 'static,
    E: AsyncWrite + Send + Unpin + 'static,
    I: BufRead + Send + 'static,
{
    let RemoteProcess {
        stdin,
        stdout,
        stderr,
        exit_status,
    } = process;
    let LocalTerminal {
        stdout: local_stdout,
        stderr: local_stderr,
        stdin: local_stdin,
    } = terminal;

    // A disabled stream must be dropped, not just left unread: the transport
    // stops writing to a closed pipe but blocks on a full one.
    let stdout_task = if options.stdout {
        Some(tokio::spawn(relay_lines(stdout, local_stdout)))
    } else {
        drop(stdout);
        None
    };
    let stderr_task = if options.stderr {
        Some(tokio::spawn(relay_lines(stderr, local_stderr)))
    } else {
        drop(stderr);
        None
    };

    let (stdin_relay, held_stdin) = if options.stdin {
        let relay = StdinRelay::spawn(local_stdin, stdin, CancellationToken::new());
        (Some(relay), None)
    } else {
        (None, Some(stdin))
    };

    let mut report = RelayReport {
        stdin_started: stdin_relay.is_some(),
        ..Default::default()
    };

    if let Some(task) = stdout_task {
        report.stdout_bytes = join_relay(task, "stdout").await;
    }
    if let Some(task) = stderr_task {
        report.stderr_bytes = join_relay(task, "stderr").await;
    }

    if let Some(relay) = stdin_relay {
        let forwarded = relay.stop().await;
        debug!("stdin relay forwarded {} bytes", forwarded);
    }
    drop(held_stdin);

    (report, exit_status)
}

async fn join_relay(task: tokio::task::JoinHandle<std::io::Result<u64>>, name: &str) -> u64 {
    match task.await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            warn!("{} relay stopped: {}", name, e);
            0
        }
        Err(e) => {
            warn!("{} relay task failed: {}", name, e);
            0
        }
    }
}
