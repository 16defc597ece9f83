use std::path::PathBuf;

use super::StorageError;

/// Persists one delivered file under its endpoint's directory, replacing any
/// earlier file with the same name.
pub trait PayloadStore: Send + Sync {
    fn save(&self, alias: &str, filename: &str, content: &[u8]) -> Result<PathBuf, StorageError>;
}
