//! SSH client connection and command execution.
//!
//! ## Connection Lifecycle
//!
//! 1. **Address Parsing**: Parse the hostname into host and port components.
//!    Supports `host:port` format with default port 22 if not specified.
//!
//! 2. **Client Configuration**: Build the russh client configuration with
//!    inactivity timeout, keepalive, and compression settings.
//!
//! 3. **Connection Establishment**: Establish the TCP connection and verify
//!    the host key against known_hosts, bounded by the connect timeout.
//!
//! 4. **Authentication**: Password authentication only.
//!
//! 5. **Command Execution**: Run short remote commands (`mkdir -p`,
//!    `chmod u+x`) and collect their output and exit status.
//!
//! Connection failures are never retried: a deployment either starts on a
//! working session or not at all.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh::{ChannelMsg, client};
use tracing::{debug, error, info};

use super::auth::PasswordAuth;
use super::error::DeployError;
use super::session::SshClientHandler;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Output of a remote command run to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` if the server sent no exit status or the command timed out
    pub exit_status: Option<u32>,
    pub timed_out: bool,
}

/// Build russh client configuration with the specified settings.
///
/// Creates an `Arc<client::Config>` with:
/// - Inactivity timeout set to `None`: a relayed remote program may stay quiet
///   for arbitrarily long
/// - Keepalive interval of 30 seconds with max 3 keepalives
/// - Compression preference based on `compress` flag (ZLIB if enabled, NONE if disabled)
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Parse address string into host and port components.
///
/// Supports the following formats:
/// - `host:port` - Returns the specified host and port
/// - `host` - Returns the host with default SSH port (22)
///
/// Uses `rsplit_once` to handle bracketed IPv6 addresses (e.g., `[::1]:22`).
pub(crate) fn parse_address(address: &str) -> Result<(String, u16), String> {
    if let Some((host, port_str)) = address.rsplit_once(':') {
        let port = port_str
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {}", e))?;
        Ok((host.to_string(), port))
    } else {
        Ok((address.to_string(), DEFAULT_SSH_PORT))
    }
}

/// Settings needed to open one SSH session.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// `host` or `host:port`
    pub address: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub compress: bool,
    pub known_hosts: Option<PathBuf>,
}

/// Establish an SSH connection and authenticate with a password.
///
/// This is the core connection function that:
/// 1. Builds client configuration
/// 2. Parses the address
/// 3. Connects with timeout, verifying the host key
/// 4. Authenticates with [`PasswordAuth`]
pub(crate) async fn connect_to_ssh(
    params: &ConnectParams,
) -> Result<client::Handle<SshClientHandler>, DeployError> {
    let config = build_client_config(params.compress);

    let (host, port) = parse_address(&params.address).map_err(DeployError::Config)?;
    let handler = SshClientHandler::new(host.clone(), port, params.known_hosts.clone());

    let connect_future = client::connect(config, (host.as_str(), port), handler);

    let mut handle = tokio::time::timeout(params.timeout, connect_future)
        .await
        .map_err(|_| DeployError::Connect {
            address: params.address.clone(),
            message: format!("Connection timed out after {:?}", params.timeout),
        })?
        .map_err(|e| classify_connect_error(e, &params.address, &host))?;

    let auth = PasswordAuth::new(params.password.clone());
    debug!("Authenticating {} with {}", params.username, auth.name());
    let success = auth
        .authenticate(&mut handle, &params.username)
        .await
        .map_err(|e| DeployError::Connect {
            address: params.address.clone(),
            message: format!("Password authentication failed: {}", e),
        })?;

    if !success {
        error!(
            "SSH authentication for {}@{} rejected",
            params.username, params.address
        );
        return Err(DeployError::AuthRejected {
            username: params.username.clone(),
            host: host.clone(),
        });
    }

    info!("Connected to {}@{}", params.username, params.address);
    Ok(handle)
}

fn classify_connect_error(e: russh::Error, address: &str, host: &str) -> DeployError {
    match e {
        russh::Error::UnknownKey => DeployError::UnknownHostKey {
            host: host.to_string(),
        },
        other => {
            error!("SSH connection to {} failed: {}", address, other);
            DeployError::Connect {
                address: address.to_string(),
                message: format!("Failed to connect: {}", other),
            }
        }
    }
}

/// Execute a command on an SSH session with timeout support.
///
/// Opens a session channel, executes the command, and collects the output
/// until the channel closes. If the command times out, returns partial
/// output with `timed_out: true` instead of an error.
pub(crate) async fn run_remote_command(
    handle: &client::Handle<SshClientHandler>,
    command: &str,
    timeout: Duration,
) -> Result<RemoteCommandOutput, DeployError> {
    let mut channel = handle.channel_open_session().await?;
    channel.exec(true, command).await?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status: Option<u32> = None;

    let result = tokio::time::timeout(timeout, async {
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    // ext == 1 is stderr in SSH protocol
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                    exit_status = Some(status);
                }
                Some(ChannelMsg::Eof) => {
                    // Continue to wait for exit status if not received yet
                    if exit_status.is_some() {
                        break;
                    }
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }
    })
    .await;

    let timed_out = result.is_err();

    let _ = channel.close().await;

    debug!("Remote command `{}` finished with {:?}", command, exit_status);
    Ok(RemoteCommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status: if timed_out { None } else { exit_status },
        timed_out,
    })
}
