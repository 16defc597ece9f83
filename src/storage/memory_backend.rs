use std::path::PathBuf;
use std::sync::Mutex;

use super::{PayloadStore, StorageError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredPayload {
    pub alias: String,
    pub filename: String,
    pub content: Vec<u8>,
}

/// Keeps every save in arrival order. Used by the `memory` engine and tests.
#[derive(Default)]
pub struct MemoryPayloadStore {
    records: Mutex<Vec<StoredPayload>>,
}

impl MemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StoredPayload> {
        self.records
            .lock()
            .expect("memory payload store mutex poisoned")
            .clone()
    }

    /// Latest content saved under `alias/filename`.
    pub fn get(&self, alias: &str, filename: &str) -> Option<Vec<u8>> {
        self.records
            .lock()
            .expect("memory payload store mutex poisoned")
            .iter()
            .rev()
            .find(|record| record.alias == alias && record.filename == filename)
            .map(|record| record.content.clone())
    }
}

impl PayloadStore for MemoryPayloadStore {
    fn save(&self, alias: &str, filename: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        self.records
            .lock()
            .expect("memory payload store mutex poisoned")
            .push(StoredPayload {
                alias: alias.to_owned(),
                filename: filename.to_owned(),
                content: content.to_vec(),
            });
        Ok(PathBuf::from(alias).join(filename))
    }
}
