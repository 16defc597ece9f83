use std::path::PathBuf;

use serde_json::json;

use crate::config::AppConfig;
use crate::logging::{LogLevel, Logger};

use super::{
    expand_home_path, FsPayloadStore, MemoryPayloadStore, PayloadStore, StorageEngine,
    StorageError,
};

pub struct StorageFacade {
    backend: Box<dyn PayloadStore>,
}

impl StorageFacade {
    pub fn initialize(app_config: &AppConfig, logger: &Logger) -> Result<Self, StorageError> {
        let Some(engine) = StorageEngine::parse(&app_config.storage.engine) else {
            return Err(StorageError::UnsupportedEngine {
                engine: app_config.storage.engine.clone(),
            });
        };
        let data_path = expand_home_path(&app_config.storage.base_dir)?;

        logger.log(
            LogLevel::Info,
            Some("storage::init"),
            "Initializing storage facade",
            Some(json!({
                "engine": engine.as_str(),
                "configured_path": app_config.storage.base_dir,
                "resolved_path": data_path.display().to_string(),
                "endpoints": app_config.scheduler.endpoints,
            })),
        );

        let backend: Box<dyn PayloadStore> = match engine {
            StorageEngine::Filesystem => Box::new(FsPayloadStore::open(&data_path)?),
            StorageEngine::Memory => Box::new(MemoryPayloadStore::new()),
        };

        logger.log(
            LogLevel::Info,
            Some("storage::init"),
            "Storage facade initialized",
            Some(json!({
                "engine": engine.as_str(),
                "resolved_path": data_path.display().to_string(),
            })),
        );

        Ok(Self { backend })
    }
}

impl PayloadStore for StorageFacade {
    fn save(&self, alias: &str, filename: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        self.backend.save(alias, filename, content)
    }
}
