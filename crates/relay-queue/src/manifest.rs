//! Per-session tool manifest published by the client.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{SessionCode, ToolManifest};

use crate::errors::Result;
use crate::kv::{KeyValueStore, manifest_key};

/// Latest tool manifest per session.
#[derive(Clone)]
pub struct ManifestStore {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl ManifestStore {
    /// Store keeping manifests for `ttl` after the last publish.
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Validate and replace the session's manifest.
    pub async fn publish(&self, code: &SessionCode, manifest: &ToolManifest) -> Result<()> {
        manifest.validate()?;
        let payload = serde_json::to_string(manifest)?;
        self.kv.set(&manifest_key(code), payload, Some(self.ttl)).await?;
        Ok(())
    }

    /// The session's manifest, if one was published.
    pub async fn get(&self, code: &SessionCode) -> Result<Option<ToolManifest>> {
        match self.kv.get(&manifest_key(code)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
