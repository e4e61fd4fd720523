//! Backend selection from settings.

use std::path::Path;
use std::sync::Arc;

use relay_core::StorageError;
use relay_settings::{StorageBackend, StorageSettings};
use tracing::info;

use crate::kv::KeyValueStore;
use crate::memory::MemoryStore;
use crate::sqlite::{SqliteConfig, SqliteStore};

/// Open the configured backend.
///
/// A relative `SQLite` path is resolved against `home`.
pub fn open_store(
    settings: &StorageSettings,
    home: &Path,
) -> Result<Arc<dyn KeyValueStore>, StorageError> {
    match settings.backend {
        StorageBackend::Memory => {
            info!(backend = %settings.backend, "storage opened");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Sqlite => {
            let path = Path::new(&settings.path);
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                home.join(path)
            };
            let config = SqliteConfig {
                pool_size: settings.pool_size,
                ..SqliteConfig::default()
            };
            let store = SqliteStore::open(&path, &config)?;
            info!(backend = %settings.backend, path = %path.display(), "storage opened");
            Ok(Arc::new(store))
        }
    }
}
