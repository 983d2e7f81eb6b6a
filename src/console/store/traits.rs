//! Key-value store interface.
//!
//! Values are plain strings grouped into named buckets. Buckets are created
//! on first write; reading from a missing bucket behaves like reading from
//! an empty one.

use thiserror::Error;

/// Bucket holding named scripts.
pub const SCRIPTS_BUCKET: &str = "scripts";

/// Bucket holding saved arguments.
pub const ARGS_BUCKET: &str = "args";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Bucketed key-value storage.
///
/// Implementations must be thread-safe (`Send + Sync`); one instance is
/// shared by every MCP call and websocket connection.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or replace a value.
    fn put(&self, bucket: &str, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key, returning whether it existed.
    fn delete(&self, bucket: &str, key: &str) -> Result<bool, StoreError>;

    /// All entries of a bucket, ordered by key.
    fn list(&self, bucket: &str) -> Result<Vec<(String, String)>, StoreError>;
}
