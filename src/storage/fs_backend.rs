use std::fs;
use std::path::{Component, Path, PathBuf};

use super::{PayloadStore, StorageError};

/// Writes `<base_dir>/<alias>/<filename>`, creating the endpoint directory on
/// demand.
pub struct FsPayloadStore {
    base_dir: PathBuf,
}

impl FsPayloadStore {
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|source| StorageError::CreateDataDir {
            path: base_dir.clone(),
            source,
        })?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn target_path(&self, alias: &str, filename: &str) -> Result<PathBuf, StorageError> {
        if !is_plain_component(alias) || !is_plain_component(filename) {
            return Err(StorageError::InvalidTarget {
                alias: alias.to_owned(),
                filename: filename.to_owned(),
            });
        }
        Ok(self.base_dir.join(alias).join(filename))
    }
}

impl PayloadStore for FsPayloadStore {
    fn save(&self, alias: &str, filename: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.target_path(alias, filename)?;
        let endpoint_dir = self.base_dir.join(alias);
        fs::create_dir_all(&endpoint_dir).map_err(|source| StorageError::CreateDataDir {
            path: endpoint_dir,
            source,
        })?;
        fs::write(&path, content).map_err(|source| StorageError::WriteFile {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

fn is_plain_component(raw: &str) -> bool {
    if raw.is_empty() || raw.contains('\0') || raw.contains('\\') {
        return false;
    }
    let mut components = Path::new(raw).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
