//! The in-flight login context and pending-request model.
//!
//! A [`LoginContext`] is the per-browser-session representation of one
//! authentication attempt. It comes in two variants, SAML-originated
//! and cross-device-originated, as a closed tagged union so every
//! capability difference is an exhaustive match rather than a stubbed
//! method.
//!
//! [`PendingRequest`] wraps the context together with everything proven
//! so far. It lives in the caller's own browser session and is never
//! shared between processes, so it needs no cross-process locking.

use crate::credentials::OnetimeCredential;
use crate::sequencer::LoginStep;
use chrono::{DateTime, Utc};
use fedid_core::{AuthnContextClass, CredentialKey, Eppn, OtherDeviceId, RequestRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A login started by an SP redirect carrying a SAML authentication
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamlLoginContext {
    pub request_ref: RequestRef,
    /// The `ID` attribute of the SAML request, echoed in the response.
    pub request_id: String,
    /// `AuthnContextClassRef` values from the request, in request order,
    /// kept verbatim since unknown values are skipped, not rejected.
    pub requested_authn_contexts: Vec<String>,
    /// SAML `ForceAuthn`: the SSO session must not satisfy this login.
    pub force_authn: bool,
    /// Values of the SP metadata assurance-requirement entity attribute,
    /// which override the contexts requested in the request itself.
    pub sp_assurance_requirement: Option<Vec<String>>,
}

impl SamlLoginContext {
    #[must_use]
    pub fn new(request_id: impl Into<String>, requested_authn_contexts: Vec<String>) -> Self {
        Self {
            request_ref: RequestRef::new(),
            request_id: request_id.into(),
            requested_authn_contexts,
            force_authn: false,
            sp_assurance_requirement: None,
        }
    }
}

/// A login driven on device 2 of a cross-device pairing. The
/// authentication requirements are copied from the transaction the
/// first device created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherDeviceLoginContext {
    pub request_ref: RequestRef,
    /// The shared transaction this context feeds back into.
    pub state_id: OtherDeviceId,
    pub authn_context: Option<AuthnContextClass>,
    pub reauthn_required: bool,
}

/// One in-flight authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum LoginContext {
    Saml(SamlLoginContext),
    OtherDevice(OtherDeviceLoginContext),
}

impl LoginContext {
    #[must_use]
    pub fn request_ref(&self) -> RequestRef {
        match self {
            LoginContext::Saml(c) => c.request_ref,
            LoginContext::OtherDevice(c) => c.request_ref,
        }
    }

    /// The SAML request id to echo to the SP, when there is one.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            LoginContext::Saml(c) => Some(&c.request_id),
            LoginContext::OtherDevice(_) => None,
        }
    }

    /// Whether an existing SSO session may satisfy this login.
    #[must_use]
    pub fn reauthn_required(&self) -> bool {
        match self {
            LoginContext::Saml(c) => c.force_authn,
            LoginContext::OtherDevice(c) => c.reauthn_required,
        }
    }

    #[must_use]
    pub fn other_device_state_id(&self) -> Option<OtherDeviceId> {
        match self {
            LoginContext::Saml(_) => None,
            LoginContext::OtherDevice(c) => Some(c.state_id),
        }
    }

    #[must_use]
    pub fn is_other_device(&self) -> bool {
        matches!(self, LoginContext::OtherDevice(_))
    }
}

/// Everything accumulated for one login attempt: the originating
/// context plus the credentials proven so far and the sequencer's step
/// history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub context: LoginContext,
    /// Subject, once known (after password auth, from the SSO session,
    /// or adopted from a finished cross-device transaction).
    pub eppn: Option<Eppn>,
    /// Credentials proven in this very transaction. Ordered map for
    /// reproducible serialization.
    pub credentials_used: BTreeMap<CredentialKey, DateTime<Utc>>,
    /// Credentials that exist only for this login, keyed like directory
    /// credentials.
    pub onetime_credentials: BTreeMap<CredentialKey, OnetimeCredential>,
    /// Device 1's link to a cross-device transaction it started.
    pub other_device_state_id: Option<OtherDeviceId>,
    /// Steps already handed out by the sequencer, for loop protection.
    pub visited_steps: Vec<LoginStep>,
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    #[must_use]
    pub fn new(context: LoginContext) -> Self {
        Self {
            context,
            eppn: None,
            credentials_used: BTreeMap::new(),
            onetime_credentials: BTreeMap::new(),
            other_device_state_id: None,
            visited_steps: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn request_ref(&self) -> RequestRef {
        self.context.request_ref()
    }

    /// Record a credential proven in this transaction. A repeated use
    /// keeps the newest timestamp.
    pub fn record_credential(&mut self, key: CredentialKey, timestamp: DateTime<Utc>) {
        let entry = self.credentials_used.entry(key).or_insert(timestamp);
        if timestamp > *entry {
            *entry = timestamp;
        }
    }

    /// Attach a one-time credential and record its use.
    pub fn add_onetime_credential(&mut self, credential: OnetimeCredential) {
        self.record_credential(credential.key.clone(), credential.timestamp);
        self.onetime_credentials
            .insert(credential.key.clone(), credential);
    }
}
