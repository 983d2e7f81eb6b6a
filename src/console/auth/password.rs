//! Password authentication.
//!
//! Jump hosts with MFA usually reject the password alone and list
//! `keyboard-interactive` as the remaining method; the chain then moves on.

use async_trait::async_trait;
use russh::client::{self, AuthResult};
use tracing::debug;

use crate::console::client::JumpHostHandler;

use super::traits::AuthStrategy;

pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }

    /// Accounts without a password go straight to keyboard-interactive.
    fn is_blank(&self) -> bool {
        self.password.is_empty()
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<JumpHostHandler>,
        username: &str,
    ) -> Result<bool, String> {
        if self.is_blank() {
            debug!("No password for {}, skipping password method", username);
            return Ok(false);
        }

        match handle
            .authenticate_password(username, &self.password)
            .await
            .map_err(|e| format!("Password authentication failed: {}", e))?
        {
            AuthResult::Success => Ok(true),
            AuthResult::Failure {
                remaining_methods, ..
            } => {
                debug!(
                    "Password not sufficient for {}, server offers {:?}",
                    username, remaining_methods
                );
                Ok(false)
            }
        }
    }

    fn name(&self) -> &'static str {
        "password"
    }
}
