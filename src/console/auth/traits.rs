//! Authentication strategy trait.

use async_trait::async_trait;
use russh::client;

use crate::console::client::JumpHostHandler;

/// One way of authenticating to a jump host.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate.
    ///
    /// * `Ok(true)` - authenticated
    /// * `Ok(false)` - credentials rejected
    /// * `Err(message)` - the attempt itself failed
    async fn authenticate(
        &self,
        handle: &mut client::Handle<JumpHostHandler>,
        username: &str,
    ) -> Result<bool, String>;

    /// Strategy name for logs.
    fn name(&self) -> &'static str;
}
