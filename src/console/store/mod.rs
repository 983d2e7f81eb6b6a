//! Durable storage for scripts and saved arguments.

mod file;
mod traits;

pub use file::JsonFileStore;
pub use traits::{ARGS_BUCKET, KeyValueStore, SCRIPTS_BUCKET, StoreError};
