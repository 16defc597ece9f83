mod backend;
mod engine;
mod error;
mod facade;
mod fs_backend;
mod memory_backend;
mod path;

pub use backend::PayloadStore;
pub use engine::StorageEngine;
pub use error::StorageError;
pub use facade::StorageFacade;
pub use fs_backend::FsPayloadStore;
pub use memory_backend::MemoryPayloadStore;
use path::expand_home_path;
