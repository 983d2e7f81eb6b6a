//! JSON file backed store.
//!
//! The whole store lives in memory as ordered maps and is rewritten to disk
//! after every mutation: the new contents go to a sibling temporary file
//! which is then renamed over the old one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use super::traits::{KeyValueStore, StoreError};

type Buckets = BTreeMap<String, BTreeMap<String, String>>;

pub struct JsonFileStore {
    path: PathBuf,
    buckets: Mutex<Buckets>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading it if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let buckets = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Buckets::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            Buckets::new()
        };
        info!(
            "Opened store {} with {} bucket(s)",
            path.display(),
            buckets.len()
        );
        Ok(Self {
            path,
            buckets: Mutex::new(buckets),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, buckets: &Buckets) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(buckets)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Persisted store to {}", self.path.display());
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<String>, StoreError> {
        let buckets = self.buckets.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(buckets.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    fn put(&self, bucket: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock().map_err(|_| StoreError::Poisoned)?;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.persist(&buckets)
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let mut buckets = self.buckets.lock().map_err(|_| StoreError::Poisoned)?;
        let removed = buckets
            .get_mut(bucket)
            .and_then(|b| b.remove(key))
            .is_some();
        if removed {
            self.persist(&buckets)?;
        }
        Ok(removed)
    }

    fn list(&self, bucket: &str) -> Result<Vec<(String, String)>, StoreError> {
        let buckets = self.buckets.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(buckets
            .get(bucket)
            .map(|b| b.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}
