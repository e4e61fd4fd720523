//! Session records with TTL.
//!
//! A record keeps its wall-clock `expires_at`; the backend key outlives it by
//! [`EXPIRED_GRACE`] so that a recently expired session can be told apart from
//! one that never existed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_core::SessionCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{Result, StoreError};
use crate::kv::{KeyValueStore, queue_key, session_key};

/// How long an expired session stays recognisable as expired.
pub const EXPIRED_GRACE: Duration = Duration::from_secs(3600);

const MAX_CODE_ATTEMPTS: usize = 8;

/// A session as stored and as returned by the HTTP API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session code.
    pub code: SessionCode,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the session stops accepting work unless touched.
    pub expires_at: DateTime<Utc>,
    /// Last client or producer activity.
    pub last_activity_at: DateTime<Utc>,
}

impl SessionInfo {
    /// Whether the session's TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Session lifecycle over a shared [`KeyValueStore`].
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl SessionStore {
    /// Store issuing sessions that live `ttl` past their last activity.
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Configured session TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create a session under a freshly generated code.
    pub async fn create(&self) -> Result<SessionInfo> {
        let mut last = None;
        for _ in 0..MAX_CODE_ATTEMPTS {
            match self.create_with_code(SessionCode::generate()).await {
                Err(StoreError::SessionExists(code)) => last = Some(code),
                other => return other,
            }
        }
        Err(StoreError::SessionExists(
            last.unwrap_or_else(SessionCode::generate),
        ))
    }

    /// Create a session under a caller-chosen code.
    ///
    /// Fails with [`StoreError::SessionExists`] while a live session holds the
    /// code; an expired one is replaced.
    pub async fn create_with_code(&self, code: SessionCode) -> Result<SessionInfo> {
        if let Some(existing) = self.get(&code).await? {
            if !existing.is_expired() {
                return Err(StoreError::SessionExists(code));
            }
        }
        let now = Utc::now();
        let info = SessionInfo {
            code,
            created_at: now,
            expires_at: expiry_from(now, self.ttl),
            last_activity_at: now,
        };
        self.save(&info).await?;
        info!(session_code = %info.code, expires_at = %info.expires_at, "session created");
        Ok(info)
    }

    /// Raw record lookup, expired or not.
    pub async fn get(&self, code: &SessionCode) -> Result<Option<SessionInfo>> {
        match self.kv.get(&session_key(code)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Resolve a live session.
    pub async fn validate(&self, code: &SessionCode) -> Result<SessionInfo> {
        match self.get(code).await? {
            None => Err(StoreError::SessionNotFound(code.clone())),
            Some(info) if info.is_expired() => Err(StoreError::SessionExpired(code.clone())),
            Some(info) => Ok(info),
        }
    }

    /// Record activity: validate, then push the session and queue TTL out.
    pub async fn touch(&self, code: &SessionCode) -> Result<SessionInfo> {
        let mut info = self.validate(code).await?;
        let now = Utc::now();
        info.last_activity_at = now;
        info.expires_at = expiry_from(now, self.ttl);
        self.save(&info).await?;
        let _ = self.kv.expire(&queue_key(code), self.ttl).await?;
        debug!(session_code = %code, "session touched");
        Ok(info)
    }

    /// Remove a session record.
    pub async fn delete(&self, code: &SessionCode) -> Result<bool> {
        Ok(self.kv.delete(&session_key(code)).await?)
    }

    async fn save(&self, info: &SessionInfo) -> Result<()> {
        let remaining = (info.expires_at - Utc::now()).to_std().unwrap_or_default();
        let payload = serde_json::to_string(info)?;
        self.kv
            .set(&session_key(&info.code), payload, Some(remaining + EXPIRED_GRACE))
            .await?;
        Ok(())
    }
}

fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use assert_matches::assert_matches;

    fn store(ttl: Duration) -> SessionStore {
        SessionStore::new(Arc::new(MemoryStore::new()), ttl)
    }

    #[tokio::test]
    async fn create_then_validate() {
        let sessions = store(Duration::from_secs(60));
        let info = sessions.create().await.unwrap();
        assert!(info.expires_at > info.created_at);
        let validated = sessions.validate(&info.code).await.unwrap();
        assert_eq!(validated.code, info.code);
    }

    #[tokio::test]
    async fn unknown_session_not_found() {
        let sessions = store(Duration::from_secs(60));
        let code = SessionCode::parse("ABCD2345").unwrap();
        assert_matches!(sessions.validate(&code).await, Err(StoreError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_code_rejected_while_live() {
        let sessions = store(Duration::from_secs(60));
        let code = SessionCode::parse("ABCD2345").unwrap();
        let _ = sessions.create_with_code(code.clone()).await.unwrap();
        assert_matches!(
            sessions.create_with_code(code).await,
            Err(StoreError::SessionExists(_))
        );
    }

    #[tokio::test]
    async fn expired_session_reports_expired() {
        let sessions = store(Duration::from_millis(30));
        let code = SessionCode::parse("ABCD2345").unwrap();
        let _ = sessions.create_with_code(code.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_matches!(sessions.validate(&code).await, Err(StoreError::SessionExpired(_)));
        assert_matches!(sessions.touch(&code).await, Err(StoreError::SessionExpired(_)));

        // an expired code can be reissued
        assert!(sessions.create_with_code(code).await.is_ok());
    }

    #[tokio::test]
    async fn touch_extends_expiry() {
        let sessions = store(Duration::from_millis(80));
        let info = sessions.create().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let touched = sessions.touch(&info.code).await.unwrap();
        assert!(touched.expires_at > info.expires_at);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sessions.validate(&info.code).await.is_ok());
    }
}
