//! Boundary interfaces to the systems this core consults but does not
//! own: the user directory, the credential verification primitives, the
//! pending-actions subsystem and the terms-of-use store.
//!
//! Each trait ships with an in-memory implementation used in tests and
//! single-node deployments.

use crate::credentials::CredentialKind;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fedid_core::{CredentialKey, Eppn, RequestRef};
use fedid_session::StoreError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The directory's view of a user, reduced to what the assurance
/// resolver needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub eppn: Eppn,
    /// Classification of every credential registered on the user.
    pub credentials: HashMap<CredentialKey, CredentialKind>,
    /// Whether the user holds a verified national-identity claim.
    pub identity_verified: bool,
}

/// Lookup into the external user/credential directory.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, eppn: &Eppn) -> Result<Option<DirectoryUser>, StoreError>;
}

/// A successfully verified proof: which credential, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCredential {
    pub key: CredentialKey,
    pub timestamp: DateTime<Utc>,
}

/// Verification primitive for password and WebAuthn factors. Failure to
/// verify is `Ok(None)`; only infrastructure trouble is an error.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(
        &self,
        eppn: &Eppn,
        credential_ref: &CredentialKey,
        proof: &str,
    ) -> Result<Option<VerifiedCredential>, StoreError>;
}

/// Gate consulted before a login may finish; `true` transfers control
/// to the actions subsystem instead.
#[async_trait]
pub trait PendingActionsChecker: Send + Sync {
    async fn has_pending_actions(
        &self,
        eppn: &Eppn,
        request_ref: &RequestRef,
    ) -> Result<bool, StoreError>;
}

/// Terms-of-use acceptance records.
#[async_trait]
pub trait TouStore: Send + Sync {
    /// Whether `eppn` accepted `version` recently enough.
    async fn has_accepted(
        &self,
        eppn: &Eppn,
        version: &str,
        reaccept_interval: Duration,
    ) -> Result<bool, StoreError>;
}

/// In-memory directory keyed by eppn.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<Eppn, DirectoryUser>>,
}

impl InMemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: DirectoryUser) {
        let mut users = self.users.write().await;
        users.insert(user.eppn.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, eppn: &Eppn) -> Result<Option<DirectoryUser>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(eppn).cloned())
    }
}

/// In-memory verifier holding plaintext proofs. Test use only; real
/// deployments wire in the password/WebAuthn services here.
#[derive(Debug, Default)]
pub struct InMemoryCredentialVerifier {
    proofs: RwLock<HashMap<(Eppn, CredentialKey), String>>,
}

impl InMemoryCredentialVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, eppn: Eppn, key: CredentialKey, proof: impl Into<String>) {
        let mut proofs = self.proofs.write().await;
        proofs.insert((eppn, key), proof.into());
    }
}

#[async_trait]
impl CredentialVerifier for InMemoryCredentialVerifier {
    async fn verify(
        &self,
        eppn: &Eppn,
        credential_ref: &CredentialKey,
        proof: &str,
    ) -> Result<Option<VerifiedCredential>, StoreError> {
        let proofs = self.proofs.read().await;
        let matched = proofs
            .get(&(eppn.clone(), credential_ref.clone()))
            .is_some_and(|stored| stored == proof);
        if !matched {
            tracing::info!(eppn = %eppn, credential = %credential_ref, "Credential verification failed");
            return Ok(None);
        }
        Ok(Some(VerifiedCredential {
            key: credential_ref.clone(),
            timestamp: Utc::now(),
        }))
    }
}

/// Actions checker with a fixed answer per user.
#[derive(Debug, Default)]
pub struct InMemoryPendingActions {
    pending: RwLock<HashMap<Eppn, bool>>,
}

impl InMemoryPendingActions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_pending(&self, eppn: Eppn, pending: bool) {
        let mut map = self.pending.write().await;
        map.insert(eppn, pending);
    }
}

#[async_trait]
impl PendingActionsChecker for InMemoryPendingActions {
    async fn has_pending_actions(
        &self,
        eppn: &Eppn,
        _request_ref: &RequestRef,
    ) -> Result<bool, StoreError> {
        let map = self.pending.read().await;
        Ok(map.get(eppn).copied().unwrap_or(false))
    }
}

/// In-memory ToU acceptance records: `(eppn, version) -> accepted_at`.
#[derive(Debug, Default)]
pub struct InMemoryTouStore {
    accepted: Arc<RwLock<HashMap<(Eppn, String), DateTime<Utc>>>>,
}

impl InMemoryTouStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn accept(&self, eppn: Eppn, version: impl Into<String>) {
        self.accept_at(eppn, version, Utc::now()).await;
    }

    pub async fn accept_at(&self, eppn: Eppn, version: impl Into<String>, at: DateTime<Utc>) {
        let mut accepted = self.accepted.write().await;
        accepted.insert((eppn, version.into()), at);
    }
}

#[async_trait]
impl TouStore for InMemoryTouStore {
    async fn has_accepted(
        &self,
        eppn: &Eppn,
        version: &str,
        reaccept_interval: Duration,
    ) -> Result<bool, StoreError> {
        let accepted = self.accepted.read().await;
        let fresh = accepted
            .get(&(eppn.clone(), version.to_string()))
            .is_some_and(|at| Utc::now() - *at < reaccept_interval);
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_verifier_rejects_wrong_proof() {
        let verifier = InMemoryCredentialVerifier::new();
        let eppn = Eppn::new("hubba-bubba");
        let key = CredentialKey::new("pw-1");
        verifier
            .register(eppn.clone(), key.clone(), "correct horse")
            .await;

        assert!(verifier
            .verify(&eppn, &key, "wrong")
            .await
            .unwrap()
            .is_none());
        let verified = verifier
            .verify(&eppn, &key, "correct horse")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verified.key, key);
    }

    #[tokio::test]
    async fn test_tou_reaccept_interval() {
        let tou = InMemoryTouStore::new();
        let eppn = Eppn::new("hubba-bubba");
        tou.accept_at(
            eppn.clone(),
            "2016-v1",
            Utc::now() - Duration::days(400),
        )
        .await;

        // stale acceptance does not count
        assert!(!tou
            .has_accepted(&eppn, "2016-v1", Duration::days(365))
            .await
            .unwrap());
        // but a long enough interval still honours it
        assert!(tou
            .has_accepted(&eppn, "2016-v1", Duration::days(500))
            .await
            .unwrap());
        // and a different version never counts
        assert!(!tou
            .has_accepted(&eppn, "2022-v1", Duration::days(500))
            .await
            .unwrap());
    }
}
