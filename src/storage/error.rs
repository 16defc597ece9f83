use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum StorageError {
    UnsupportedEngine {
        engine: String,
    },
    HomeDirectoryUnavailable,
    CreateDataDir {
        path: PathBuf,
        source: std::io::Error,
    },
    InvalidTarget {
        alias: String,
        filename: String,
    },
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedEngine { engine } => write!(
                f,
                "unsupported storage.engine '{engine}'; allowed values: fs, memory"
            ),
            Self::HomeDirectoryUnavailable => {
                write!(f, "cannot resolve storage path because HOME is not set")
            }
            Self::CreateDataDir { path, source } => write!(
                f,
                "failed to create storage directory '{}': {source}",
                path.display()
            ),
            Self::InvalidTarget { alias, filename } => write!(
                f,
                "refusing to store '{filename}' for endpoint '{alias}': not a plain file name"
            ),
            Self::WriteFile { path, source } => {
                write!(f, "failed to write '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CreateDataDir { source, .. } | Self::WriteFile { source, .. } => Some(source),
            _ => None,
        }
    }
}
