//! # relay-settings
//!
//! Layered configuration for the relay server and client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **User file**: `~/.relay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `RELAY_*` overrides (highest priority)
//!
//! Component crates turn the relevant section into their own runtime config
//! (`ServerConfig::from_settings`, `ClientConfig::from_settings`, ...).

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, relay_home,
    settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = RelaySettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_match_documented_values() {
        let settings = RelaySettings::default();
        assert_eq!(settings.server.port, 8765);
        assert_eq!(settings.server.heartbeat_interval_secs, 30);
        assert_eq!(settings.client.connection.heartbeat_timeout_ms, 45_000);
        assert_eq!(settings.client.dedup.max_tracked_ids, 1000);
        assert_eq!(settings.client.batch.max_batch_size, 10);
        assert_eq!(settings.server.storage.backend, StorageBackend::Memory);
    }
}
