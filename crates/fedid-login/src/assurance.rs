//! The assurance resolver: from credentials proven to an authentication
//! context the IdP is willing to assert, or a typed refusal.
//!
//! Two phases. [`AuthnState::gather`] collects and classifies everything
//! proven: credentials used in this transaction, credentials inherited
//! from the SSO session when re-authentication is not forced, and an
//! external-MFA record carried on the session. [`resolve_authn_context`]
//! is then a pure function from those flags and the requested context to
//! an [`AuthnInfo`] or an [`AssuranceError`], following a fixed decision
//! table where the order of checks determines which refusal the user
//! sees first.

use crate::collaborators::DirectoryUser;
use crate::context::PendingRequest;
use crate::credentials::{CredentialKind, ProofingMethod, UsedCredential, UsedWhere};
use crate::error::AssuranceError;
use chrono::{DateTime, Utc};
use fedid_core::{
    AuthnContextClass, CredentialKey, RequestRef, SWAMID_AL1, SWAMID_AL2, SWAMID_AL2_MFA_HI,
    SWEDEN_CONNECT_LOA3,
};
use fedid_session::SsoSession;

/// The resolved authentication to assert to the SP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnInfo {
    /// `AuthnContextClassRef` to assert.
    pub class_ref: AuthnContextClass,
    /// `eduPersonAssurance` attribute values.
    pub authn_attributes: Vec<String>,
    /// `AuthnInstant`: when the authentication happened.
    pub instant: DateTime<Utc>,
}

/// Classified view of everything proven for one login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthnState {
    pub password_used: bool,
    pub fido_used: bool,
    pub external_mfa_used: bool,
    /// A FIDO credential registered under SWAMID AL2-MFA was used.
    pub swamid_al2_used: bool,
    /// A credential meeting the high-assurance MFA profile was used.
    pub swamid_al2_hi_used: bool,
    /// The user holds a verified national-identity claim.
    pub is_swamid_al2: bool,
    /// The credential uses that produced the flags above.
    pub credentials: Vec<UsedCredential>,
}

impl AuthnState {
    /// Collect and classify the credentials backing this login.
    ///
    /// Starts from the pending request's own credentials, resolving each
    /// key against the directory and then against the request's one-time
    /// credentials; keys known to neither are logged and skipped. Unless
    /// re-authentication is forced, credentials from the SSO session are
    /// inherited (request use wins on duplicate keys) and a session
    /// external-MFA record is synthesized into a credential use of its
    /// own.
    #[must_use]
    pub fn gather(
        user: &DirectoryUser,
        pending: &PendingRequest,
        sso_session: Option<&SsoSession>,
        reauthn_required: bool,
    ) -> Self {
        let mut used: Vec<UsedCredential> = pending
            .credentials_used
            .iter()
            .map(|(key, ts)| UsedCredential {
                key: key.clone(),
                timestamp: *ts,
                source: UsedWhere::Request,
            })
            .collect();

        let inherited = sso_session.filter(|_| !reauthn_required);
        if let Some(session) = inherited {
            for authn in &session.authn_credentials {
                if !used.iter().any(|u| u.key == authn.credential_key) {
                    used.push(UsedCredential {
                        key: authn.credential_key.clone(),
                        timestamp: authn.timestamp,
                        source: UsedWhere::SsoSession,
                    });
                }
            }
        }

        let mut state = AuthnState {
            is_swamid_al2: user.identity_verified,
            ..AuthnState::default()
        };

        for cred in used {
            let kind = user
                .credentials
                .get(&cred.key)
                .or_else(|| pending.onetime_credentials.get(&cred.key).map(|o| &o.kind))
                .cloned();
            match kind {
                Some(kind) => {
                    state.classify(&kind);
                    state.credentials.push(cred);
                }
                None => {
                    tracing::warn!(credential = %cred.key, "Could not find credential, ignoring");
                }
            }
        }

        // an external-MFA proof recorded on the session counts as a
        // second factor for this login too
        if let Some(ext) = inherited.and_then(|s| s.external_mfa.as_ref()) {
            let kind = CredentialKind::ExternalMfa {
                issuer: ext.issuer.clone(),
                authn_context: ext.authn_context.clone(),
            };
            state.classify(&kind);
            state.credentials.push(UsedCredential {
                key: CredentialKey::new(format!("external-mfa/{}", ext.issuer)),
                timestamp: ext.timestamp,
                source: UsedWhere::SsoSession,
            });
        }

        state
    }

    fn classify(&mut self, kind: &CredentialKind) {
        match kind {
            CredentialKind::Password => self.password_used = true,
            CredentialKind::Fido { proofing } => {
                self.fido_used = true;
                match proofing {
                    ProofingMethod::None => {}
                    ProofingMethod::SwamidAl2Mfa => self.swamid_al2_used = true,
                    ProofingMethod::SwamidAl2MfaHi => self.swamid_al2_hi_used = true,
                }
            }
            CredentialKind::ExternalMfa { authn_context, .. } => {
                self.external_mfa_used = true;
                if authn_context == SWEDEN_CONNECT_LOA3 {
                    self.swamid_al2_hi_used = true;
                }
            }
        }
    }

    #[must_use]
    pub fn is_singlefactor(&self) -> bool {
        self.password_used || self.fido_used
    }

    #[must_use]
    pub fn is_multifactor(&self) -> bool {
        self.password_used && (self.fido_used || self.external_mfa_used)
    }

    #[must_use]
    pub fn is_swamid_al2_mfa(&self) -> bool {
        self.swamid_al2_used || self.swamid_al2_hi_used
    }

    /// The most recent credential use, for `AuthnInstant`.
    #[must_use]
    pub fn latest_use(&self) -> Option<DateTime<Utc>> {
        self.credentials.iter().map(|c| c.timestamp).max()
    }
}

/// The authentication context this login must satisfy.
///
/// An SP metadata assurance-requirement attribute overrides the contexts
/// in the request itself, falling back to the request when none of its
/// values is recognised. Among requested values, the first recognised
/// one wins; unknown values are skipped, never errors.
#[must_use]
pub fn requested_authn_context(pending: &PendingRequest) -> Option<AuthnContextClass> {
    use crate::context::LoginContext;
    let saml = match &pending.context {
        LoginContext::OtherDevice(od) => return od.authn_context,
        LoginContext::Saml(saml) => saml,
    };

    if let Some(required) = &saml.sp_assurance_requirement {
        for value in required {
            if let Ok(class) = value.parse::<AuthnContextClass>() {
                tracing::debug!(
                    request_id = %saml.request_id,
                    class = %class,
                    "SP assurance requirement overrides requested context"
                );
                return Some(class);
            }
        }
        tracing::warn!(
            request_id = %saml.request_id,
            "No recognised SP assurance requirement, using requested context"
        );
    }

    if saml.requested_authn_contexts.len() > 1 {
        tracing::warn!(
            request_id = %saml.request_id,
            count = saml.requested_authn_contexts.len(),
            "More than one authn context requested, using first recognised"
        );
    }
    for value in &saml.requested_authn_contexts {
        match value.parse::<AuthnContextClass>() {
            Ok(class) => return Some(class),
            Err(e) => tracing::debug!(request_id = %saml.request_id, "Skipping {e}"),
        }
    }
    None
}

/// Resolve the context class and assurance attributes to assert.
pub fn resolve_authn_context(
    authn: &AuthnState,
    requested: Option<AuthnContextClass>,
    request_ref: RequestRef,
) -> Result<AuthnInfo, AssuranceError> {
    let class_ref = match requested {
        Some(AuthnContextClass::RefedsMfa) => {
            if !authn.password_used {
                return Err(AssuranceError::MissingPasswordFactor { request_ref });
            }
            if !authn.is_multifactor() {
                return Err(AssuranceError::MissingMultiFactor { request_ref });
            }
            if !authn.is_swamid_al2_mfa() {
                return Err(AssuranceError::WrongMultiFactor { request_ref });
            }
            AuthnContextClass::RefedsMfa
        }
        Some(AuthnContextClass::RefedsSfa) => {
            if !authn.is_singlefactor() {
                return Err(AssuranceError::MissingSingleFactor { request_ref });
            }
            AuthnContextClass::RefedsSfa
        }
        Some(AuthnContextClass::EduidMfa) => {
            if !authn.password_used {
                return Err(AssuranceError::MissingPasswordFactor { request_ref });
            }
            if !authn.is_multifactor() {
                return Err(AssuranceError::MissingMultiFactor { request_ref });
            }
            AuthnContextClass::EduidMfa
        }
        Some(AuthnContextClass::FidoU2f) => {
            if !(authn.password_used && authn.fido_used) {
                return Err(AssuranceError::MissingMultiFactor { request_ref });
            }
            AuthnContextClass::FidoU2f
        }
        Some(AuthnContextClass::PasswordPt) => {
            if !authn.password_used {
                return Err(AssuranceError::MissingPasswordFactor { request_ref });
            }
            AuthnContextClass::PasswordPt
        }
        // no recognised request: assert the strongest thing proven
        None => {
            let fallback = if authn.is_multifactor() {
                AuthnContextClass::RefedsMfa
            } else if authn.password_used {
                AuthnContextClass::PasswordPt
            } else {
                return Err(AssuranceError::MissingAuthentication { request_ref });
            };
            tracing::info!(
                request_ref = %request_ref,
                class = %fallback,
                "No recognised context requested, using fallback"
            );
            fallback
        }
    };

    let mut authn_attributes = vec![SWAMID_AL1.to_string()];
    if authn.is_swamid_al2 {
        authn_attributes.push(SWAMID_AL2.to_string());
    }
    if authn.swamid_al2_hi_used
        && matches!(
            requested,
            Some(AuthnContextClass::RefedsSfa | AuthnContextClass::RefedsMfa)
        )
    {
        authn_attributes.push(SWAMID_AL2_MFA_HI.to_string());
    }

    let instant = authn.latest_use().unwrap_or_else(Utc::now);
    tracing::info!(
        request_ref = %request_ref,
        class = %class_ref,
        attributes = ?authn_attributes,
        "Resolved authentication context"
    );
    Ok(AuthnInfo {
        class_ref,
        authn_attributes,
        instant,
    })
}
