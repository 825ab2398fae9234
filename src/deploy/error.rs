//! Error types for a deployment run.
//!
//! Errors fall into three groups:
//!
//! 1. **Connection errors** (`Connect`, `UnknownHostKey`, `AuthRejected`): fatal,
//!    raised before any file is transferred.
//!
//! 2. **Local filesystem errors** (`LocalRoot`, `ExcludeFile`, `Walk`,
//!    `ReadFile`): fatal, may be raised mid-run and leave a partially deployed
//!    remote tree behind.
//!
//! 3. **Remote errors** (`Ssh`, `Scp`, `RemoteExit`): channel and copy failures
//!    are fatal. Non-zero exit statuses of remote commands only surface as
//!    `RemoteExit` when exit-status checking is enabled.
//!
//! Nothing is retried.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cannot use local root {}: {source}", .path.display())]
    LocalRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot use exclusion file {}: {source}", .path.display())]
    ExcludeFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk local tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to read {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    #[error("Host key for {host} is not trusted (not found in known_hosts or changed)")]
    UnknownHostKey { host: String },

    #[error("Authentication failed for {username}@{host}: password rejected")]
    AuthRejected { username: String, host: String },

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("SCP transfer to {destination} failed: {message}")]
    Scp {
        destination: String,
        message: String,
    },

    #[error("Remote command `{command}` exited with {}", describe_status(.status))]
    RemoteExit {
        command: String,
        status: Option<u32>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Returns `true` for errors raised while establishing the session.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DeployError::Connect { .. }
                | DeployError::UnknownHostKey { .. }
                | DeployError::AuthRejected { .. }
        )
    }
}

fn describe_status(status: &Option<u32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "no exit status".to_string(),
    }
}
