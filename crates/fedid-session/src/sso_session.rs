//! The durable Single Sign-On session model.
//!
//! An [`SsoSession`] remembers a previous authentication so the user is
//! not re-prompted at every SP they visit. What ends up in the SAML
//! `AuthnContext` is a separate policy product computed by the assurance
//! resolver; this record only stores what was proven and when.

use chrono::{DateTime, Duration, Utc};
use fedid_core::{CredentialKey, Eppn, SsoSessionId};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One credential successfully used, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnData {
    pub credential_key: CredentialKey,
    pub timestamp: DateTime<Utc>,
}

/// Record of a federated IdP assertion used as a second factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMfaData {
    pub issuer: String,
    pub authn_context: String,
    pub timestamp: DateTime<Utc>,
}

/// A durable record of an established authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoSession {
    /// Capability token. Never log this in full; use [`SsoSession::public_id`].
    pub session_id: SsoSessionId,
    pub eppn: Eppn,
    /// Credentials used, one entry per key, newest use retained,
    /// ordered by key for reproducible serialization.
    pub authn_credentials: Vec<AuthnData>,
    /// Timestamp of the most recent credential use recorded.
    pub authn_timestamp: DateTime<Utc>,
    /// Set when a federated IdP assertion served as a second factor.
    pub external_mfa: Option<ExternalMfaData>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SsoSession {
    /// Create a session for a first successful local authentication.
    #[must_use]
    pub fn new(eppn: Eppn, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            session_id: SsoSessionId::new(),
            eppn,
            authn_credentials: Vec::new(),
            authn_timestamp: now,
            external_mfa: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Record a credential successfully used in this session.
    ///
    /// Only the latest use of a particular credential is kept, and an
    /// older use racing in never replaces a newer one. Entries stay
    /// sorted by credential key so serialization is deterministic.
    pub fn add_authn_credential(&mut self, authn: AuthnData) {
        match self
            .authn_credentials
            .iter_mut()
            .find(|existing| existing.credential_key == authn.credential_key)
        {
            Some(existing) => {
                if authn.timestamp > existing.timestamp {
                    existing.timestamp = authn.timestamp;
                }
            }
            None => self.authn_credentials.push(authn.clone()),
        }
        self.authn_credentials
            .sort_by(|a, b| a.credential_key.cmp(&b.credential_key));
        if authn.timestamp > self.authn_timestamp {
            self.authn_timestamp = authn.timestamp;
        }
    }

    /// Push `expires_at` forward on reuse, keeping the invariant
    /// `expires_at > authn_timestamp`.
    pub fn renew(&mut self, ttl: Duration) {
        self.expires_at = Utc::now() + ttl;
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Age of this session, measured from the last authentication.
    #[must_use]
    pub fn age(&self) -> Duration {
        Utc::now() - self.authn_timestamp
    }

    /// An identifier for this session that cannot be used to hijack it
    /// if it ends up in a log file.
    #[must_use]
    pub fn public_id(&self) -> String {
        format!(
            "{}.{}",
            self.eppn,
            self.created_at.format("%Y-%m-%dT%H:%M:%S")
        )
    }
}

impl Display for SsoSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Session id allows impersonation if leaked, so only show a prefix.
        let short_id = &self.session_id.to_string()[..8];
        write!(
            f,
            "<SsoSession: id={}..., eppn={}, authn_ts={}, expires_at={}>",
            short_id,
            self.eppn,
            self.authn_timestamp.to_rfc3339(),
            self.expires_at.to_rfc3339()
        )
    }
}
