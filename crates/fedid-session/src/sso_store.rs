//! SSO session storage.
//!
//! Provides both an in-memory store (tests) and a PostgreSQL-backed
//! store for production. Absence of a session is not an error (callers
//! treat it as "not authenticated"); store unavailability is, and must
//! never be downgraded to absence.
//!
//! Expected table:
//!
//! ```sql
//! CREATE TABLE sso_sessions (
//!     session_id        UUID PRIMARY KEY,
//!     eppn              TEXT NOT NULL,
//!     authn_credentials JSONB NOT NULL,
//!     authn_timestamp   TIMESTAMPTZ NOT NULL,
//!     external_mfa      JSONB,
//!     created_at        TIMESTAMPTZ NOT NULL,
//!     expires_at        TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX sso_sessions_eppn_idx ON sso_sessions (eppn);
//! CREATE INDEX sso_sessions_expires_idx ON sso_sessions (expires_at);
//! ```

use crate::error::StoreError;
use crate::sso_session::SsoSession;
use async_trait::async_trait;
use chrono::Utc;
use fedid_core::{Eppn, SsoSessionId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Store of established SSO sessions.
#[async_trait]
pub trait SsoSessionStore: Send + Sync {
    /// Add a new session or update an existing one (upsert by session id).
    async fn save(&self, session: &SsoSession) -> Result<(), StoreError>;

    /// Look up a session by id. Expired sessions are never returned.
    async fn get(&self, session_id: &SsoSessionId) -> Result<Option<SsoSession>, StoreError>;

    /// All live sessions for a user. Used for single-logout fan-out.
    async fn get_all_for_user(&self, eppn: &Eppn) -> Result<Vec<SsoSession>, StoreError>;

    /// Remove a session (single logout). Returns whether one was removed.
    async fn remove(&self, session_id: &SsoSessionId) -> Result<bool, StoreError>;

    /// Delete sessions past their TTL. Returns the number deleted.
    async fn cleanup_expired(&self) -> Result<u64, StoreError>;
}

/// In-memory session store for tests and single-node use.
#[derive(Debug, Default)]
pub struct InMemorySsoSessionStore {
    sessions: Arc<RwLock<HashMap<SsoSessionId, SsoSession>>>,
}

impl InMemorySsoSessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SsoSessionStore for InMemorySsoSessionStore {
    async fn save(&self, session: &SsoSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id, session.clone());
        tracing::debug!(session = %session, "Saved SSO session");
        Ok(())
    }

    async fn get(&self, session_id: &SsoSessionId) -> Result<Option<SsoSession>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .filter(|s| !s.is_expired())
            .cloned())
    }

    async fn get_all_for_user(&self, eppn: &Eppn) -> Result<Vec<SsoSession>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut found: Vec<SsoSession> = sessions
            .values()
            .filter(|s| &s.eppn == eppn && !s.is_expired())
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        Ok(found)
    }

    async fn remove(&self, session_id: &SsoSessionId) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(session_id).is_some())
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        Ok((before - sessions.len()) as u64)
    }
}

/// PostgreSQL-backed session store for production.
pub struct PostgresSsoSessionStore {
    pool: PgPool,
}

impl PostgresSsoSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &PgRow) -> Result<SsoSession, StoreError> {
        let credentials: serde_json::Value = row.get("authn_credentials");
        let external_mfa: Option<serde_json::Value> = row.get("external_mfa");
        Ok(SsoSession {
            session_id: SsoSessionId::from_uuid(row.get("session_id")),
            eppn: Eppn::new(row.get::<String, _>("eppn")),
            authn_credentials: serde_json::from_value(credentials)?,
            authn_timestamp: row.get("authn_timestamp"),
            external_mfa: external_mfa.map(serde_json::from_value).transpose()?,
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        })
    }
}

#[async_trait]
impl SsoSessionStore for PostgresSsoSessionStore {
    async fn save(&self, session: &SsoSession) -> Result<(), StoreError> {
        let credentials = serde_json::to_value(&session.authn_credentials)?;
        let external_mfa = session
            .external_mfa
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        sqlx::query(
            r"
            INSERT INTO sso_sessions
                (session_id, eppn, authn_credentials, authn_timestamp, external_mfa, created_at, expires_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_id) DO UPDATE SET
                authn_credentials = EXCLUDED.authn_credentials,
                authn_timestamp = EXCLUDED.authn_timestamp,
                external_mfa = EXCLUDED.external_mfa,
                expires_at = EXCLUDED.expires_at
            ",
        )
        .bind(session.session_id.as_uuid())
        .bind(session.eppn.as_str())
        .bind(credentials)
        .bind(session.authn_timestamp)
        .bind(external_mfa)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(session = %session, "Saved SSO session");
        Ok(())
    }

    async fn get(&self, session_id: &SsoSessionId) -> Result<Option<SsoSession>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT session_id, eppn, authn_credentials, authn_timestamp, external_mfa, created_at, expires_at
            FROM sso_sessions
            WHERE session_id = $1 AND expires_at > $2
            ",
        )
        .bind(session_id.as_uuid())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn get_all_for_user(&self, eppn: &Eppn) -> Result<Vec<SsoSession>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT session_id, eppn, authn_credentials, authn_timestamp, external_mfa, created_at, expires_at
            FROM sso_sessions
            WHERE eppn = $1 AND expires_at > $2
            ORDER BY created_at
            ",
        )
        .bind(eppn.as_str())
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_session).collect()
    }

    async fn remove(&self, session_id: &SsoSessionId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sso_sessions WHERE session_id = $1")
            .bind(session_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sso_sessions WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::debug!(deleted = deleted, "Cleaned up expired SSO sessions");
        }
        Ok(deleted)
    }
}
