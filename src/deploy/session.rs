//! SSH client handler with known_hosts verification.
//!
//! The server key is checked against the user's `~/.ssh/known_hosts` (or an
//! override file). Hosts that are missing from the file, or whose key has
//! changed, are rejected: the connection fails instead of prompting, like
//! `StrictHostKeyChecking=yes` in OpenSSH.

use std::path::PathBuf;

use russh::{client, keys};
use tracing::{debug, warn};

/// Client handler for russh that only accepts known host keys.
pub struct SshClientHandler {
    host: String,
    port: u16,
    known_hosts: Option<PathBuf>,
}

impl SshClientHandler {
    /// Create a handler verifying `host:port`.
    ///
    /// `known_hosts` overrides the default `~/.ssh/known_hosts` location.
    pub fn new(host: impl Into<String>, port: u16, known_hosts: Option<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            known_hosts,
        }
    }

    fn lookup(&self, key: &keys::PublicKey) -> Result<bool, keys::Error> {
        match &self.known_hosts {
            Some(path) => keys::check_known_hosts_path(&self.host, self.port, key, path),
            None => keys::check_known_hosts(&self.host, self.port, key),
        }
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.lookup(server_public_key) {
            Ok(true) => {
                debug!("Host key for {}:{} is trusted", self.host, self.port);
                Ok(true)
            }
            Ok(false) => {
                warn!(
                    "Host {}:{} is not in known_hosts; refusing to connect",
                    self.host, self.port
                );
                Ok(false)
            }
            Err(e) => {
                warn!(
                    "Host key verification for {}:{} failed: {}",
                    self.host, self.port, e
                );
                Ok(false)
            }
        }
    }
}
