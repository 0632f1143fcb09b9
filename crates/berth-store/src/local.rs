use crate::StoreError;
use berth_schema::ContentHash;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// The up-to-date signature (`.berth/local.lock`).
///
/// Never committed to version control and safe to drop at any time; its
/// absence only forces the next run to do the full reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalState {
    pub config_hash: ContentHash,
    pub lock_hash: ContentHash,
    pub tool_version: String,
}

impl LocalState {
    pub fn new(config_hash: ContentHash, lock_hash: ContentHash) -> Self {
        Self {
            config_hash,
            lock_hash,
            tool_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    /// Read the signature. Missing or unreadable content counts as absent,
    /// since the file is purely advisory.
    pub fn read(path: impl AsRef<Path>) -> Result<Option<Self>, StoreError> {
        let content = match fs::read_to_string(path.as_ref()) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content).ok())
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(self)?;
        berth_schema::write_atomic(path.as_ref(), json.as_bytes())?;
        Ok(())
    }

    pub fn remove(path: impl AsRef<Path>) -> Result<(), StoreError> {
        match fs::remove_file(path.as_ref()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn matches(&self, config_hash: &ContentHash, lock_hash: &ContentHash) -> bool {
        self.config_hash == *config_hash
            && self.lock_hash == *lock_hash
            && self.tool_version == env!("CARGO_PKG_VERSION")
    }
}
