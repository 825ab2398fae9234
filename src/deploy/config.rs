//! Configuration resolution for a deployment run.
//!
//! Values are resolved with a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided command line flag (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `EV3_HOSTNAME` | `ev3dev` | SSH host, optionally `host:port` |
//! | `EV3_USERNAME` | `robot` | SSH user |
//! | `EV3_PASSWORD` | `maker` | SSH password |
//! | `SSH_CONNECT_TIMEOUT` | 30s | Connection timeout in seconds |
//! | `SSH_COMMAND_TIMEOUT` | 180s | Timeout for `mkdir`/`chmod` in seconds |
//! | `SSH_COMPRESSION` | false | Enable zlib compression |
//! | `SSH_KNOWN_HOSTS` | `~/.ssh/known_hosts` | Trusted host key file |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default SSH hostname of an ev3dev brick
pub const DEFAULT_HOSTNAME: &str = "ev3dev";

/// Default ev3dev user
pub const DEFAULT_USERNAME: &str = "robot";

/// Default ev3dev password
pub const DEFAULT_PASSWORD: &str = "maker";

/// Default exclusion file, relative to the local root
pub const DEFAULT_EXCLUDE_FILE: &str = "./.ignore";

/// Default patterns of files marked executable on the remote host
pub const DEFAULT_EXECUTABLE: &[&str] = &["*.py", "*.sh"];

/// Default SSH connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default timeout for remote housekeeping commands in seconds
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 180;

/// Environment variable name for the SSH hostname
pub const HOSTNAME_ENV_VAR: &str = "EV3_HOSTNAME";

/// Environment variable name for the SSH username
pub const USERNAME_ENV_VAR: &str = "EV3_USERNAME";

/// Environment variable name for the SSH password
pub const PASSWORD_ENV_VAR: &str = "EV3_PASSWORD";

/// Environment variable name for SSH connection timeout
pub const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";

/// Environment variable name for remote command timeout
pub const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";

/// Environment variable name for SSH compression
pub const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";

/// Environment variable name for the known_hosts override
pub const KNOWN_HOSTS_ENV_VAR: &str = "SSH_KNOWN_HOSTS";

/// Which streams of an executed remote program are relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectOptions {
    /// Remote stdout to local stdout
    pub stdout: bool,
    /// Remote stderr to local stderr
    pub stderr: bool,
    /// Local stdin to remote stdin. Off by default: local input has no
    /// natural end, so the relay can only be cancelled, not finished.
    pub stdin: bool,
}

impl Default for RedirectOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            stdin: false,
        }
    }
}

/// Fully resolved settings for one deployment run.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Local directory to deploy
    pub local_root: PathBuf,
    /// SSH host, optionally with `:port`
    pub hostname: String,
    pub username: String,
    pub password: String,
    /// Exclusion file, relative to `local_root` unless absolute
    pub exclude_file: String,
    /// Program to run after the transfer, relative to the remote project root
    pub execute_file: Option<String>,
    /// Patterns of files to mark executable
    pub executable: Vec<String>,
    /// Print progress lines to stdout
    pub print_console: bool,
    pub redirect: RedirectOptions,
    /// Abort on non-zero exit status of remote commands
    pub check_exit_status: bool,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub compression: bool,
    /// Trusted host keys; `None` means the user's `~/.ssh/known_hosts`
    pub known_hosts: Option<PathBuf>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            local_root: PathBuf::from("."),
            hostname: DEFAULT_HOSTNAME.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            exclude_file: DEFAULT_EXCLUDE_FILE.to_string(),
            execute_file: None,
            executable: DEFAULT_EXECUTABLE.iter().map(|s| s.to_string()).collect(),
            print_console: true,
            redirect: RedirectOptions::default(),
            check_exit_status: false,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            compression: false,
            known_hosts: None,
        }
    }
}

/// Resolve a string setting with priority: parameter -> env var -> default
pub fn resolve_string(param: Option<String>, env_var: &str, default: &str) -> String {
    // Priority 1: Use parameter if provided
    if let Some(value) = param {
        return value;
    }

    // Priority 2: Use environment variable if set and non-empty
    if let Ok(value) = env::var(env_var)
        && !value.is_empty()
    {
        return value;
    }

    // Priority 3: Default value
    default.to_string()
}

/// Resolve the connection timeout value with priority: parameter -> env var -> default
pub fn resolve_connect_timeout(timeout_param: Option<u64>) -> u64 {
    resolve_secs(
        timeout_param,
        CONNECT_TIMEOUT_ENV_VAR,
        DEFAULT_CONNECT_TIMEOUT_SECS,
    )
}

/// Resolve the remote command timeout value with priority: parameter -> env var -> default
pub fn resolve_command_timeout(timeout_param: Option<u64>) -> u64 {
    resolve_secs(
        timeout_param,
        COMMAND_TIMEOUT_ENV_VAR,
        DEFAULT_COMMAND_TIMEOUT_SECS,
    )
}

fn resolve_secs(param: Option<u64>, env_var: &str, default: u64) -> u64 {
    if let Some(secs) = param {
        return secs;
    }

    if let Ok(env_secs) = env::var(env_var)
        && let Ok(secs) = env_secs.parse::<u64>()
    {
        return secs;
    }

    default
}

/// Resolve the compression setting with priority: parameter -> env var -> default (false)
///
/// The EV3's ARM9 CPU makes zlib slower than the link for typical projects,
/// so compression is off unless asked for.
pub fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    false
}

/// Resolve the known_hosts override with priority: parameter -> env var -> none
pub fn resolve_known_hosts(param: Option<PathBuf>) -> Option<PathBuf> {
    param.or_else(|| {
        env::var(KNOWN_HOSTS_ENV_VAR)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    })
}
