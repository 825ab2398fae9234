//! Deployment of a local project directory to an ev3dev brick.
//!
//! This module is organized into the following submodules:
//!
//! - `pattern`: Shell-style glob matching for exclusion and executable patterns
//! - `exclude`: Exclusion file loading, created with defaults when missing
//! - `walk`: Deterministic recursive enumeration of local files
//! - `config`: Configuration resolution with environment variable support
//! - `error`: Error taxonomy for a deployment run
//! - `session`: russh client handler with known_hosts verification
//! - `auth`: Password authentication
//! - `client`: SSH connection and remote command execution
//! - `scp`: SCP sink protocol
//! - `transport`: The `Transport` trait and its SSH implementation
//! - `relay`: Stream relay between a remote program and the local terminal
//! - `orchestrator`: The deployment run itself

pub(crate) mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod exclude;
pub mod orchestrator;
pub mod pattern;
pub mod relay;
pub mod scp;
pub(crate) mod session;
pub mod transport;
pub mod walk;

pub use client::ConnectParams;
pub use config::{DeployConfig, RedirectOptions};
pub use error::DeployError;
pub use orchestrator::{DeploySummary, ProjectRoot, Workspace, run};
pub use transport::{RemotePath, RemoteProcess, SshTransport, Transport};
