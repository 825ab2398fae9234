//! Password-based SSH authentication.
//!
//! Password authentication is the only supported method; ev3dev ships with
//! a fixed default password and no keys installed.

use russh::client;

use super::session::SshClientHandler;

/// Password authentication strategy.
///
/// Uses username/password credentials to authenticate with the SSH server.
pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    /// Create a new password authentication strategy.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }

    /// Attempt to authenticate with the SSH server.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - Credentials rejected
    /// * `Err(e)` - Error during the authentication exchange
    pub async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, russh::Error> {
        let result = handle
            .authenticate_password(username, &self.password)
            .await?;

        Ok(result.success())
    }

    pub fn name(&self) -> &'static str {
        "password"
    }
}
