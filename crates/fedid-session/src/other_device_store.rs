//! Cross-device transaction storage.
//!
//! Device 1 (polling, submitting response codes) and device 2
//! (completing authentication) are different connections racing on the
//! same document, so every mutation after the initial insert is a
//! targeted, guarded update. A guard miss is diagnosed against the
//! stored row and reported as a typed [`MutateError`], never applied as
//! a blind whole-document overwrite.
//!
//! Expected table:
//!
//! ```sql
//! CREATE TABLE other_device_states (
//!     login_id         UUID PRIMARY KEY,
//!     short_code       TEXT NOT NULL,
//!     status           TEXT NOT NULL,
//!     eppn             TEXT,
//!     authn_context    TEXT,
//!     reauthn_required BOOLEAN NOT NULL,
//!     credentials_used JSONB NOT NULL,
//!     response_code    TEXT,
//!     bad_attempts     INTEGER NOT NULL DEFAULT 0,
//!     device1_ip       TEXT,
//!     created_at       TIMESTAMPTZ NOT NULL,
//!     expires_at       TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX other_device_short_code_idx ON other_device_states (short_code);
//! CREATE INDEX other_device_expires_idx ON other_device_states (expires_at);
//! ```

use crate::error::{MutateError, StoreError};
use crate::other_device::{OtherDeviceState, OtherDeviceStatus};
use async_trait::async_trait;
use chrono::Utc;
use fedid_core::{CredentialKey, Eppn, OtherDeviceId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Store of cross-device login transactions.
#[async_trait]
pub trait OtherDeviceStore: Send + Sync {
    /// Insert a freshly created transaction.
    async fn save(&self, state: &OtherDeviceState) -> Result<(), StoreError>;

    /// Look up by login id. Expired transactions are never returned.
    async fn get(&self, login_id: &OtherDeviceId) -> Result<Option<OtherDeviceState>, StoreError>;

    /// Look up a live, still-pending transaction by its short code.
    /// Short codes are only unique among live transactions.
    async fn find_by_short_code(
        &self,
        short_code: &str,
    ) -> Result<Option<OtherDeviceState>, StoreError>;

    /// Device 2 completed authentication: bind the subject, the
    /// credentials proven, and the freshly minted response code, moving
    /// the transaction to `Authenticated`.
    ///
    /// Guarded on `Pending` with no response code bound yet, so the
    /// code is set at most once per transaction.
    async fn bind_authentication(
        &self,
        login_id: &OtherDeviceId,
        eppn: &Eppn,
        credentials_used: &[CredentialKey],
        response_code: &str,
    ) -> Result<OtherDeviceState, MutateError>;

    /// Device 1 submitted a wrong response code: atomically increment
    /// the counter and return the new value.
    async fn record_bad_attempt(&self, login_id: &OtherDeviceId) -> Result<u32, MutateError>;

    /// Device 1 presented the correct response code: move
    /// `Authenticated` to the terminal `Finished`.
    async fn finish(&self, login_id: &OtherDeviceId) -> Result<OtherDeviceState, MutateError>;

    /// Abort from either device, or on hitting the bad-attempt ceiling.
    /// Aborting an already aborted transaction is a no-op; a finished
    /// one cannot be aborted.
    async fn abort(&self, login_id: &OtherDeviceId) -> Result<(), MutateError>;

    /// Delete a transaction outright.
    async fn remove(&self, login_id: &OtherDeviceId) -> Result<bool, StoreError>;

    /// Delete transactions past their TTL, whatever their state.
    async fn cleanup_expired(&self) -> Result<u64, StoreError>;
}

/// Classify why a guarded mutation did not apply.
fn diagnose(state: Option<&OtherDeviceState>, wanted: OtherDeviceStatus) -> MutateError {
    match state {
        None => MutateError::NotFound,
        Some(s) if s.is_expired() => MutateError::Expired,
        Some(s) if s.status != wanted => MutateError::Conflict,
        // Guard matched on re-read; a concurrent writer got in between.
        Some(_) => MutateError::Conflict,
    }
}

/// In-memory transaction store for tests and single-node use.
#[derive(Debug, Default)]
pub struct InMemoryOtherDeviceStore {
    states: Arc<RwLock<HashMap<OtherDeviceId, OtherDeviceState>>>,
}

impl InMemoryOtherDeviceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtherDeviceStore for InMemoryOtherDeviceStore {
    async fn save(&self, state: &OtherDeviceState) -> Result<(), StoreError> {
        let mut states = self.states.write().await;
        states.insert(state.login_id, state.clone());
        tracing::debug!(state = %state, "Saved other-device state");
        Ok(())
    }

    async fn get(&self, login_id: &OtherDeviceId) -> Result<Option<OtherDeviceState>, StoreError> {
        let states = self.states.read().await;
        Ok(states.get(login_id).filter(|s| !s.is_expired()).cloned())
    }

    async fn find_by_short_code(
        &self,
        short_code: &str,
    ) -> Result<Option<OtherDeviceState>, StoreError> {
        let states = self.states.read().await;
        Ok(states
            .values()
            .find(|s| s.short_code == short_code && s.is_pending())
            .cloned())
    }

    async fn bind_authentication(
        &self,
        login_id: &OtherDeviceId,
        eppn: &Eppn,
        credentials_used: &[CredentialKey],
        response_code: &str,
    ) -> Result<OtherDeviceState, MutateError> {
        let mut states = self.states.write().await;
        let state = states.get_mut(login_id);
        match state {
            Some(s) if s.is_pending() && s.response_code.is_none() => {
                s.status = OtherDeviceStatus::Authenticated;
                s.eppn = Some(eppn.clone());
                s.credentials_used = credentials_used.to_vec();
                s.response_code = Some(response_code.to_string());
                tracing::info!(login_id = %login_id, eppn = %eppn, "Bound device-2 authentication");
                Ok(s.clone())
            }
            other => Err(diagnose(other.as_deref(), OtherDeviceStatus::Pending)),
        }
    }

    async fn record_bad_attempt(&self, login_id: &OtherDeviceId) -> Result<u32, MutateError> {
        let mut states = self.states.write().await;
        let state = states.get_mut(login_id);
        match state {
            Some(s) if s.is_authenticated() => {
                s.bad_attempts += 1;
                tracing::warn!(
                    login_id = %login_id,
                    bad_attempts = s.bad_attempts,
                    "Wrong response code submitted"
                );
                Ok(s.bad_attempts)
            }
            other => Err(diagnose(other.as_deref(), OtherDeviceStatus::Authenticated)),
        }
    }

    async fn finish(&self, login_id: &OtherDeviceId) -> Result<OtherDeviceState, MutateError> {
        let mut states = self.states.write().await;
        let state = states.get_mut(login_id);
        match state {
            Some(s) if s.is_authenticated() => {
                s.status = OtherDeviceStatus::Finished;
                tracing::info!(login_id = %login_id, "Cross-device transaction finished");
                Ok(s.clone())
            }
            other => Err(diagnose(other.as_deref(), OtherDeviceStatus::Authenticated)),
        }
    }

    async fn abort(&self, login_id: &OtherDeviceId) -> Result<(), MutateError> {
        let mut states = self.states.write().await;
        match states.get_mut(login_id) {
            None => Err(MutateError::NotFound),
            Some(s) if s.status == OtherDeviceStatus::Aborted => Ok(()),
            Some(s) if s.status == OtherDeviceStatus::Finished => Err(MutateError::Conflict),
            Some(s) => {
                s.status = OtherDeviceStatus::Aborted;
                tracing::info!(login_id = %login_id, "Cross-device transaction aborted");
                Ok(())
            }
        }
    }

    async fn remove(&self, login_id: &OtherDeviceId) -> Result<bool, StoreError> {
        let mut states = self.states.write().await;
        Ok(states.remove(login_id).is_some())
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, s| !s.is_expired());
        Ok((before - states.len()) as u64)
    }
}

/// PostgreSQL-backed transaction store for production.
pub struct PostgresOtherDeviceStore {
    pool: PgPool,
}

impl PostgresOtherDeviceStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_state(row: &PgRow) -> Result<OtherDeviceState, StoreError> {
        let status: String = row.get("status");
        let authn_context: Option<String> = row.get("authn_context");
        let device1_ip: Option<String> = row.get("device1_ip");
        let credentials: serde_json::Value = row.get("credentials_used");
        Ok(OtherDeviceState {
            login_id: OtherDeviceId::from_uuid(row.get("login_id")),
            short_code: row.get("short_code"),
            status: status.parse().map_err(StoreError::Serialization)?,
            eppn: row.get::<Option<String>, _>("eppn").map(Eppn::new),
            authn_context: authn_context
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| StoreError::Serialization(format!("{e}")))?,
            reauthn_required: row.get("reauthn_required"),
            credentials_used: serde_json::from_value(credentials)?,
            response_code: row.get("response_code"),
            bad_attempts: u32::try_from(row.get::<i32, _>("bad_attempts")).unwrap_or(0),
            device1_ip: device1_ip
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| StoreError::Serialization(format!("{e}")))?,
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        })
    }

    /// Fetch without the expiry filter, for guard-miss diagnosis.
    async fn get_raw(
        &self,
        login_id: &OtherDeviceId,
    ) -> Result<Option<OtherDeviceState>, StoreError> {
        let row = sqlx::query("SELECT * FROM other_device_states WHERE login_id = $1")
            .bind(login_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_state).transpose()
    }

    async fn diagnose_miss(
        &self,
        login_id: &OtherDeviceId,
        wanted: OtherDeviceStatus,
    ) -> MutateError {
        match self.get_raw(login_id).await {
            Ok(state) => diagnose(state.as_ref(), wanted),
            Err(e) => MutateError::Store(e),
        }
    }
}

#[async_trait]
impl OtherDeviceStore for PostgresOtherDeviceStore {
    async fn save(&self, state: &OtherDeviceState) -> Result<(), StoreError> {
        let credentials = serde_json::to_value(&state.credentials_used)?;
        sqlx::query(
            r"
            INSERT INTO other_device_states
                (login_id, short_code, status, eppn, authn_context, reauthn_required,
                 credentials_used, response_code, bad_attempts, device1_ip, created_at, expires_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(state.login_id.as_uuid())
        .bind(&state.short_code)
        .bind(state.status.as_str())
        .bind(state.eppn.as_ref().map(Eppn::as_str))
        .bind(state.authn_context.map(|c| c.as_uri()))
        .bind(state.reauthn_required)
        .bind(credentials)
        .bind(&state.response_code)
        .bind(i32::try_from(state.bad_attempts).unwrap_or(i32::MAX))
        .bind(state.device1_ip.map(|ip| ip.to_string()))
        .bind(state.created_at)
        .bind(state.expires_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(state = %state, "Saved other-device state");
        Ok(())
    }

    async fn get(&self, login_id: &OtherDeviceId) -> Result<Option<OtherDeviceState>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM other_device_states WHERE login_id = $1 AND expires_at > $2",
        )
        .bind(login_id.as_uuid())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_state).transpose()
    }

    async fn find_by_short_code(
        &self,
        short_code: &str,
    ) -> Result<Option<OtherDeviceState>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT * FROM other_device_states
            WHERE short_code = $1 AND status = 'pending' AND expires_at > $2
            ",
        )
        .bind(short_code)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_state).transpose()
    }

    async fn bind_authentication(
        &self,
        login_id: &OtherDeviceId,
        eppn: &Eppn,
        credentials_used: &[CredentialKey],
        response_code: &str,
    ) -> Result<OtherDeviceState, MutateError> {
        let credentials =
            serde_json::to_value(credentials_used).map_err(StoreError::from)?;
        let row = sqlx::query(
            r"
            UPDATE other_device_states
            SET status = 'authenticated', eppn = $2, credentials_used = $3, response_code = $4
            WHERE login_id = $1
              AND status = 'pending'
              AND response_code IS NULL
              AND expires_at > $5
            RETURNING *
            ",
        )
        .bind(login_id.as_uuid())
        .bind(eppn.as_str())
        .bind(credentials)
        .bind(response_code)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                tracing::info!(login_id = %login_id, eppn = %eppn, "Bound device-2 authentication");
                Ok(Self::row_to_state(&r)?)
            }
            None => Err(self.diagnose_miss(login_id, OtherDeviceStatus::Pending).await),
        }
    }

    async fn record_bad_attempt(&self, login_id: &OtherDeviceId) -> Result<u32, MutateError> {
        let row = sqlx::query(
            r"
            UPDATE other_device_states
            SET bad_attempts = bad_attempts + 1
            WHERE login_id = $1 AND status = 'authenticated' AND expires_at > $2
            RETURNING bad_attempts
            ",
        )
        .bind(login_id.as_uuid())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let count = u32::try_from(r.get::<i32, _>("bad_attempts")).unwrap_or(u32::MAX);
                tracing::warn!(
                    login_id = %login_id,
                    bad_attempts = count,
                    "Wrong response code submitted"
                );
                Ok(count)
            }
            None => {
                Err(self
                    .diagnose_miss(login_id, OtherDeviceStatus::Authenticated)
                    .await)
            }
        }
    }

    async fn finish(&self, login_id: &OtherDeviceId) -> Result<OtherDeviceState, MutateError> {
        let row = sqlx::query(
            r"
            UPDATE other_device_states
            SET status = 'finished'
            WHERE login_id = $1 AND status = 'authenticated' AND expires_at > $2
            RETURNING *
            ",
        )
        .bind(login_id.as_uuid())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                tracing::info!(login_id = %login_id, "Cross-device transaction finished");
                Ok(Self::row_to_state(&r)?)
            }
            None => {
                Err(self
                    .diagnose_miss(login_id, OtherDeviceStatus::Authenticated)
                    .await)
            }
        }
    }

    async fn abort(&self, login_id: &OtherDeviceId) -> Result<(), MutateError> {
        let row = sqlx::query(
            r"
            UPDATE other_device_states
            SET status = 'aborted'
            WHERE login_id = $1 AND status IN ('pending', 'authenticated')
            RETURNING login_id
            ",
        )
        .bind(login_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        if row.is_some() {
            tracing::info!(login_id = %login_id, "Cross-device transaction aborted");
            return Ok(());
        }
        match self.get_raw(login_id).await? {
            None => Err(MutateError::NotFound),
            Some(s) if s.status == OtherDeviceStatus::Aborted => Ok(()),
            Some(_) => Err(MutateError::Conflict),
        }
    }

    async fn remove(&self, login_id: &OtherDeviceId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM other_device_states WHERE login_id = $1")
            .bind(login_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM other_device_states WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::debug!(deleted = deleted, "Cleaned up expired other-device states");
        }
        Ok(deleted)
    }
}
