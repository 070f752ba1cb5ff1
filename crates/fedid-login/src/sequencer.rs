//! The login sequencer: orders the steps a pending login must pass.
//!
//! Each call to [`LoginSequencer::next_step`] recomputes the next
//! required step from what is proven so far. Handing out a step that was
//! already handed out in the same transaction means the interaction made
//! no progress, so the transaction is aborted instead of redirecting the
//! user in circles.

use crate::assurance::{requested_authn_context, resolve_authn_context, AuthnInfo, AuthnState};
#[cfg(test)]
use chrono::Utc;
use crate::collaborators::{PendingActionsChecker, TouStore, UserDirectory};
use crate::context::PendingRequest;
use crate::credentials::CredentialKind;
use crate::error::LoginError;
use fedid_core::{AuthnContextClass, Eppn, FedidConfig};
use fedid_session::{AuthnData, ExternalMfaData, SsoSession, SsoSessionStore};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// One interactive step of a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginStep {
    /// Username and password.
    PwAuth,
    /// Second factor.
    Mfa,
    /// Terms-of-use acceptance.
    Tou,
    /// Terminal: session established, assertion ready.
    Finished,
}

impl Display for LoginStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoginStep::PwAuth => "pwauth",
            LoginStep::Mfa => "mfa",
            LoginStep::Tou => "tou",
            LoginStep::Finished => "finished",
        };
        write!(f, "{s}")
    }
}

/// What the caller should do next with a pending login.
#[derive(Debug)]
pub enum SequencerOutcome {
    /// Send the user through this interactive step, then call again.
    Step(LoginStep),
    /// Pending actions exist; control transfers to that subsystem.
    TransferToActions,
    /// Login complete: session established, assertion data resolved.
    Finished {
        authn_info: AuthnInfo,
        session: SsoSession,
    },
}

fn demands_mfa(class: AuthnContextClass) -> bool {
    matches!(
        class,
        AuthnContextClass::RefedsMfa | AuthnContextClass::EduidMfa | AuthnContextClass::FidoU2f
    )
}

/// Drives a pending login through its required steps.
pub struct LoginSequencer {
    config: FedidConfig,
    sso_store: Arc<dyn SsoSessionStore>,
    directory: Arc<dyn UserDirectory>,
    actions: Arc<dyn PendingActionsChecker>,
    tou: Arc<dyn TouStore>,
}

impl LoginSequencer {
    #[must_use]
    pub fn new(
        config: FedidConfig,
        sso_store: Arc<dyn SsoSessionStore>,
        directory: Arc<dyn UserDirectory>,
        actions: Arc<dyn PendingActionsChecker>,
        tou: Arc<dyn TouStore>,
    ) -> Self {
        Self {
            config,
            sso_store,
            directory,
            actions,
            tou,
        }
    }

    /// Compute what must happen next for this pending login.
    ///
    /// Interactive steps are recorded on the request; computing a step
    /// already recorded aborts with [`LoginError::LoopDetected`].
    pub async fn next_step(
        &self,
        pending: &mut PendingRequest,
        sso_session: Option<&SsoSession>,
    ) -> Result<SequencerOutcome, LoginError> {
        let reauthn = pending.context.reauthn_required();

        let known_eppn = pending.eppn.clone().or_else(|| {
            sso_session
                .filter(|_| !reauthn)
                .map(|s| s.eppn.clone())
        });
        let Some(eppn) = known_eppn else {
            return self.advance(pending, LoginStep::PwAuth);
        };

        let user = self
            .directory
            .find_user(&eppn)
            .await?
            .ok_or_else(|| LoginError::UnknownUser(eppn.clone()))?;
        let authn = AuthnState::gather(&user, pending, sso_session, reauthn);

        if !authn.password_used {
            return self.advance(pending, LoginStep::PwAuth);
        }

        let requested = requested_authn_context(pending);
        if requested.is_some_and(demands_mfa) && !(authn.fido_used || authn.external_mfa_used) {
            return self.advance(pending, LoginStep::Mfa);
        }

        let tou_ok = self
            .tou
            .has_accepted(
                &eppn,
                &self.config.tou_version,
                self.config.tou_reaccept_interval(),
            )
            .await?;
        if !tou_ok {
            return self.advance(pending, LoginStep::Tou);
        }

        // everything resolvable must resolve before we commit anything
        let authn_info = resolve_authn_context(&authn, requested, pending.request_ref())?;

        if self
            .actions
            .has_pending_actions(&eppn, &pending.request_ref())
            .await?
        {
            tracing::info!(
                request_ref = %pending.request_ref(),
                eppn = %eppn,
                "Pending actions exist, transferring"
            );
            return Ok(SequencerOutcome::TransferToActions);
        }

        let session = self.establish_session(&eppn, pending, sso_session).await?;
        tracing::info!(
            request_ref = %pending.request_ref(),
            session = %session,
            class = %authn_info.class_ref,
            "Login finished"
        );
        Ok(SequencerOutcome::Finished {
            authn_info,
            session,
        })
    }

    /// Create the SSO session, or fold this login's credentials into the
    /// inherited one.
    async fn establish_session(
        &self,
        eppn: &Eppn,
        pending: &PendingRequest,
        sso_session: Option<&SsoSession>,
    ) -> Result<SsoSession, LoginError> {
        let mut session = match sso_session {
            Some(s) if !pending.context.reauthn_required() && &s.eppn == eppn => s.clone(),
            _ => SsoSession::new(eppn.clone(), self.config.sso_session_ttl()),
        };
        for (key, timestamp) in &pending.credentials_used {
            // one-time credentials live only in the request, not the session
            if pending.onetime_credentials.contains_key(key) {
                continue;
            }
            session.add_authn_credential(AuthnData {
                credential_key: key.clone(),
                timestamp: *timestamp,
            });
        }
        for otc in pending.onetime_credentials.values() {
            if let CredentialKind::ExternalMfa {
                issuer,
                authn_context,
            } = &otc.kind
            {
                session.external_mfa = Some(ExternalMfaData {
                    issuer: issuer.clone(),
                    authn_context: authn_context.clone(),
                    timestamp: otc.timestamp,
                });
            }
        }
        session.renew(self.config.sso_session_ttl());
        self.sso_store.save(&session).await?;
        Ok(session)
    }

    fn advance(
        &self,
        pending: &mut PendingRequest,
        step: LoginStep,
    ) -> Result<SequencerOutcome, LoginError> {
        if pending.visited_steps.contains(&step) {
            tracing::error!(
                request_ref = %pending.request_ref(),
                step = %step,
                "Login step repeated without progress, aborting"
            );
            return Err(LoginError::LoopDetected {
                request_ref: pending.request_ref(),
                step,
            });
        }
        pending.visited_steps.push(step);
        tracing::debug!(request_ref = %pending.request_ref(), step = %step, "Next login step");
        Ok(SequencerOutcome::Step(step))
    }
}
