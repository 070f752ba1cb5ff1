//! Credential classification consumed by the assurance resolver.
//!
//! A closed set of credential kinds, matched exhaustively, so adding a
//! new kind is a compile-time-checked change everywhere it matters.

use chrono::{DateTime, Utc};
use fedid_core::CredentialKey;
use serde::{Deserialize, Serialize};

/// Identity-proofing classification of a FIDO credential, as recorded
/// by the user directory when the credential was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProofingMethod {
    /// Registered without identity proofing.
    #[default]
    None,
    /// Registered under the SWAMID AL2-MFA profile.
    SwamidAl2Mfa,
    /// Registered under the SWAMID AL2-MFA-HI profile.
    SwamidAl2MfaHi,
}

/// What kind of proof a credential key stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialKind {
    Password,
    Fido { proofing: ProofingMethod },
    /// An assertion from a federated IdP used as a second factor. Only
    /// ever held as a one-time credential, never in the directory.
    ExternalMfa {
        issuer: String,
        authn_context: String,
    },
}

/// Where a used credential was proven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsedWhere {
    /// Proven in this very transaction.
    Request,
    /// Inherited from the active SSO session.
    SsoSession,
}

/// One credential use, the unit the assurance resolver consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedCredential {
    pub key: CredentialKey,
    pub timestamp: DateTime<Utc>,
    pub source: UsedWhere,
}

/// A credential that exists only for the duration of one login, such as
/// an external-IdP MFA assertion. Stored on the pending request, keyed
/// like directory credentials so the resolver treats both uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnetimeCredential {
    pub key: CredentialKey,
    pub kind: CredentialKind,
    pub timestamp: DateTime<Utc>,
}

impl OnetimeCredential {
    /// Build the one-time credential representing an external-IdP MFA
    /// assertion.
    #[must_use]
    pub fn external_mfa(
        issuer: impl Into<String>,
        authn_context: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let issuer = issuer.into();
        let key = CredentialKey::new(format!("external-mfa/{issuer}"));
        Self {
            key,
            kind: CredentialKind::ExternalMfa {
                issuer,
                authn_context: authn_context.into(),
            },
            timestamp,
        }
    }
}
