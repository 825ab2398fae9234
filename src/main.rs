#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use tracing::{debug, error};

use ev3deploy::deploy::config::{
    self, DEFAULT_EXCLUDE_FILE, DEFAULT_EXECUTABLE, DEFAULT_HOSTNAME, DEFAULT_PASSWORD,
    DEFAULT_USERNAME, HOSTNAME_ENV_VAR, PASSWORD_ENV_VAR, USERNAME_ENV_VAR,
};
use ev3deploy::deploy::{DeployConfig, RedirectOptions};

/// Copy a project directory to an ev3dev brick and optionally run it.
#[derive(Parser, Debug)]
#[command(name = "ev3deploy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SSH host of the brick, optionally `host:port` [env: EV3_HOSTNAME] [default: ev3dev]
    #[arg(long)]
    hostname: Option<String>,

    /// SSH user [env: EV3_USERNAME] [default: robot]
    #[arg(long)]
    username: Option<String>,

    /// SSH password [env: EV3_PASSWORD] [default: maker]
    #[arg(long)]
    password: Option<String>,

    /// Local project directory to deploy
    #[arg(long, default_value = ".")]
    path: PathBuf,

    /// Exclusion file, relative to the project directory; created if missing
    #[arg(long = "exclude_file", default_value = DEFAULT_EXCLUDE_FILE)]
    exclude_file: String,

    /// Program to run on the brick after the transfer, relative to the project
    #[arg(long = "execute_file")]
    execute_file: Option<String>,

    /// Pattern of files to mark executable; repeat for several [default: *.py, *.sh]
    #[arg(long, value_name = "GLOB")]
    executable: Vec<String>,

    /// Do not print progress lines
    #[arg(long)]
    quiet: bool,

    /// Do not relay the remote program's stdout
    #[arg(long = "no_stdout")]
    no_stdout: bool,

    /// Do not relay the remote program's stderr
    #[arg(long = "no_stderr")]
    no_stderr: bool,

    /// Relay local stdin to the remote program
    #[arg(long)]
    stdin: bool,

    /// Fail when a remote command exits with a non-zero status
    #[arg(long = "check_exit_status")]
    check_exit_status: bool,

    /// SSH connection timeout in seconds [env: SSH_CONNECT_TIMEOUT] [default: 30]
    #[arg(long = "connect_timeout", value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// Timeout of remote mkdir/chmod in seconds [env: SSH_COMMAND_TIMEOUT] [default: 180]
    #[arg(long = "command_timeout", value_name = "SECS")]
    command_timeout: Option<u64>,

    /// Enable zlib compression [env: SSH_COMPRESSION]
    #[arg(long)]
    compress: bool,

    /// known_hosts file to verify the brick against [env: SSH_KNOWN_HOSTS]
    #[arg(long = "known_hosts", value_name = "FILE")]
    known_hosts: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> DeployConfig {
        let executable = if self.executable.is_empty() {
            DEFAULT_EXECUTABLE.iter().map(|s| s.to_string()).collect()
        } else {
            self.executable
        };

        DeployConfig {
            local_root: self.path,
            hostname: config::resolve_string(self.hostname, HOSTNAME_ENV_VAR, DEFAULT_HOSTNAME),
            username: config::resolve_string(self.username, USERNAME_ENV_VAR, DEFAULT_USERNAME),
            password: config::resolve_string(self.password, PASSWORD_ENV_VAR, DEFAULT_PASSWORD),
            exclude_file: self.exclude_file,
            execute_file: self.execute_file,
            executable,
            print_console: !self.quiet,
            redirect: RedirectOptions {
                stdout: !self.no_stdout,
                stderr: !self.no_stderr,
                stdin: self.stdin,
            },
            check_exit_status: self.check_exit_status,
            connect_timeout: Duration::from_secs(config::resolve_connect_timeout(
                self.connect_timeout,
            )),
            command_timeout: Duration::from_secs(config::resolve_command_timeout(
                self.command_timeout,
            )),
            compression: config::resolve_compression(self.compress.then_some(true)),
            known_hosts: config::resolve_known_hosts(self.known_hosts),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Progress goes to stdout, so diagnostics stay on stderr and quiet by default
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("warn".parse()?),
        )
        .init();

    let config = Args::parse().into_config();
    debug!("Resolved configuration for {}@{}", config.username, config.hostname);

    match ev3deploy::deploy::run(&config).await {
        Ok(summary) => {
            debug!(
                "Deployment finished: {} sent, {} excluded, exit status {:?}",
                summary.sent.len(),
                summary.excluded.len(),
                summary.exit_status
            );
            Ok(())
        }
        Err(e) if e.is_connection_error() => {
            error!(
                "Could not open an SSH session to {}; check the hostname, credentials and known_hosts",
                config.hostname
            );
            Err(e.into())
        }
        Err(e) => {
            error!("Deployment failed: {}", e);
            Err(e.into())
        }
    }
}
