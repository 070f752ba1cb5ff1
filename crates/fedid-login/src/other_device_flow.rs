//! The cross-device login protocol.
//!
//! Device 1 holds a pending SP login but cannot comfortably authenticate
//! (no security key, shared terminal). It starts a transaction and shows
//! a QR code / short code. Device 2 scans it, authenticates normally,
//! and is shown a secret response code. The user types that code into
//! device 1, which thereby adopts the authentication proven on device 2.
//!
//! The response code is the proof that the person at device 1 is the
//! person who authenticated on device 2. It is never transmitted to
//! device 1; device-1 submissions are only compared against it, with a
//! bad-attempt ceiling aborting the transaction.

use crate::assurance::requested_authn_context;
use crate::context::{OtherDeviceLoginContext, PendingRequest};
use crate::error::{LoginError, OtherDeviceError};
use crate::proximity::{classify_proximity, DeviceProximity};
use chrono::{Duration, Utc};
use fedid_core::{CredentialKey, Eppn, FedidConfig, OtherDeviceId, RequestRef};
use fedid_session::{
    make_response_code, MutateError, OtherDeviceState, OtherDeviceStatus, OtherDeviceStore,
};
use std::net::IpAddr;
use std::sync::Arc;

/// What device 1 renders as QR code / pairing instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingInfo {
    pub login_id: OtherDeviceId,
    pub short_code: String,
    /// Time left on this transaction.
    pub expires_in: Duration,
    /// The full TTL, for progress rendering.
    pub expires_max: Duration,
}

/// What device 2 learns when it joins a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    /// The login context to drive the sequencer with on device 2.
    pub context: OtherDeviceLoginContext,
    pub short_code: String,
    /// Anomaly signal: how close device 2 is to where device 1 started.
    pub device1_proximity: Option<DeviceProximity>,
    pub expires_in: Duration,
}

/// How device 2 identifies the transaction it is joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRef {
    /// From the QR code / URL.
    LoginId(OtherDeviceId),
    /// Typed by hand.
    ShortCode(String),
}

/// Outcome of a device-1 response-code submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Correct code: device 1 has adopted the authentication.
    Accepted {
        eppn: Eppn,
        credentials_used: Vec<CredentialKey>,
    },
    /// Device 2 has not completed authentication yet.
    NotReady,
    /// Wrong code; the transaction stays open.
    Incorrect { bad_attempts: u32 },
}

fn map_mutate(e: MutateError) -> LoginError {
    match e {
        MutateError::NotFound => OtherDeviceError::UnknownState.into(),
        MutateError::Expired => OtherDeviceError::Expired.into(),
        MutateError::Conflict => OtherDeviceError::AlreadyCompleted.into(),
        MutateError::Store(e) => LoginError::Store(e),
    }
}

/// Server side of the cross-device pairing protocol.
pub struct OtherDeviceFlow {
    config: FedidConfig,
    store: Arc<dyn OtherDeviceStore>,
}

impl OtherDeviceFlow {
    #[must_use]
    pub fn new(config: FedidConfig, store: Arc<dyn OtherDeviceStore>) -> Self {
        Self { config, store }
    }

    /// Device 1 starts (or re-displays) a cross-device transaction for
    /// its pending login.
    ///
    /// Calling again while a previous transaction is still pending
    /// returns that transaction, so reloading the QR page does not churn
    /// short codes.
    pub async fn begin(
        &self,
        pending: &mut PendingRequest,
        device1_ip: Option<IpAddr>,
    ) -> Result<PairingInfo, LoginError> {
        if let Some(state_id) = pending.other_device_state_id {
            if let Some(state) = self.store.get(&state_id).await? {
                if state.is_pending() {
                    return Ok(self.pairing_info(&state));
                }
            }
        }

        let state = OtherDeviceState::new(
            requested_authn_context(pending),
            pending.context.reauthn_required(),
            device1_ip,
            self.config.other_device_ttl(),
        );
        self.store.save(&state).await?;
        pending.other_device_state_id = Some(state.login_id);
        tracing::info!(
            request_ref = %pending.request_ref(),
            login_id = %state.login_id,
            "Started cross-device login"
        );
        Ok(self.pairing_info(&state))
    }

    /// Device 2 joins a pending transaction, getting a login context of
    /// its own and a proximity signal for its UI.
    pub async fn join(
        &self,
        transaction: &TransactionRef,
        device2_ip: Option<IpAddr>,
    ) -> Result<JoinInfo, LoginError> {
        let state = match transaction {
            TransactionRef::LoginId(id) => self.store.get(id).await?,
            TransactionRef::ShortCode(code) => self.store.find_by_short_code(code).await?,
        }
        .ok_or(OtherDeviceError::UnknownState)?;
        if !state.is_pending() {
            return Err(OtherDeviceError::AlreadyCompleted.into());
        }

        let device1_proximity = match (state.device1_ip, device2_ip) {
            (Some(a), Some(b)) => Some(classify_proximity(a, b)),
            _ => None,
        };
        let context = OtherDeviceLoginContext {
            request_ref: RequestRef::new(),
            state_id: state.login_id,
            authn_context: state.authn_context,
            reauthn_required: state.reauthn_required,
        };
        tracing::info!(
            login_id = %state.login_id,
            proximity = ?device1_proximity,
            "Device 2 joined cross-device login"
        );
        Ok(JoinInfo {
            context,
            expires_in: state.expires_in(),
            short_code: state.short_code,
            device1_proximity,
        })
    }

    /// Device 2 finished its login: bind the result and mint the
    /// response code. The returned code is shown to the device-2 user
    /// only.
    pub async fn complete_on_device2(
        &self,
        context: &OtherDeviceLoginContext,
        eppn: &Eppn,
        credentials_used: &[CredentialKey],
    ) -> Result<String, LoginError> {
        let code = make_response_code();
        self.store
            .bind_authentication(&context.state_id, eppn, credentials_used, &code)
            .await
            .map_err(map_mutate)?;
        Ok(code)
    }

    /// Device 1 submits a user-typed response code.
    ///
    /// On a match the pending login adopts the subject and credentials
    /// proven on device 2 and can proceed to the sequencer. On the
    /// ceiling-th wrong code the transaction is aborted.
    pub async fn submit_response_code(
        &self,
        pending: &mut PendingRequest,
        code: &str,
    ) -> Result<SubmitOutcome, LoginError> {
        let state_id = pending
            .other_device_state_id
            .ok_or(OtherDeviceError::UnknownState)?;
        let state = self
            .store
            .get(&state_id)
            .await?
            .ok_or(OtherDeviceError::UnknownState)?;

        match state.status {
            OtherDeviceStatus::Pending => return Ok(SubmitOutcome::NotReady),
            OtherDeviceStatus::Finished | OtherDeviceStatus::Aborted => {
                return Err(OtherDeviceError::AlreadyCompleted.into());
            }
            OtherDeviceStatus::Authenticated => {}
        }

        if state.response_code.as_deref() == Some(code) {
            let finished = self.store.finish(&state_id).await.map_err(map_mutate)?;
            let eppn = finished
                .eppn
                .clone()
                .ok_or(OtherDeviceError::UnknownState)?;
            let now = Utc::now();
            for key in &finished.credentials_used {
                pending.record_credential(key.clone(), now);
            }
            pending.eppn = Some(eppn.clone());
            tracing::info!(
                request_ref = %pending.request_ref(),
                login_id = %state_id,
                eppn = %eppn,
                "Device 1 adopted cross-device authentication"
            );
            return Ok(SubmitOutcome::Accepted {
                eppn,
                credentials_used: finished.credentials_used,
            });
        }

        let bad_attempts = self
            .store
            .record_bad_attempt(&state_id)
            .await
            .map_err(map_mutate)?;
        if bad_attempts >= self.config.other_device_max_bad_attempts {
            self.store.abort(&state_id).await.map_err(map_mutate)?;
            tracing::warn!(
                login_id = %state_id,
                bad_attempts = bad_attempts,
                "Response-code attempt ceiling reached, transaction aborted"
            );
            return Err(OtherDeviceError::TooManyAttempts.into());
        }
        Ok(SubmitOutcome::Incorrect { bad_attempts })
    }

    /// Abort from either device. Idempotent for already-aborted
    /// transactions.
    pub async fn abort(&self, login_id: &OtherDeviceId) -> Result<(), LoginError> {
        self.store.abort(login_id).await.map_err(map_mutate)
    }

    /// Device 1 abandons its pending login. The login itself dies with
    /// the browser session; this kills the linked cross-device
    /// transaction, if any, so device 2 cannot complete into a void.
    pub async fn abort_pending(&self, pending: &PendingRequest) -> Result<(), LoginError> {
        let Some(state_id) = pending.other_device_state_id else {
            return Ok(());
        };
        match self.store.abort(&state_id).await {
            // a transaction that already ran to completion needs no abort
            Ok(()) | Err(MutateError::NotFound | MutateError::Conflict) => Ok(()),
            Err(e) => Err(map_mutate(e)),
        }
    }

    fn pairing_info(&self, state: &OtherDeviceState) -> PairingInfo {
        PairingInfo {
            login_id: state.login_id,
            short_code: state.short_code.clone(),
            expires_in: state.expires_in(),
            expires_max: self.config.other_device_ttl(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{LoginContext, SamlLoginContext};
    use fedid_core::AuthnContextClass;
    use fedid_session::InMemoryOtherDeviceStore;

    fn flow() -> (OtherDeviceFlow, Arc<InMemoryOtherDeviceStore>) {
        let store = Arc::new(InMemoryOtherDeviceStore::new());
        (
            OtherDeviceFlow::new(FedidConfig::default(), store.clone()),
            store,
        )
    }

    fn device1_pending() -> PendingRequest {
        PendingRequest::new(LoginContext::Saml(SamlLoginContext::new(
            "id-1",
            vec!["https://refeds.org/profile/mfa".to_string()],
        )))
    }

    #[tokio::test]
    async fn test_begin_carries_requested_context() {
        let (flow, store) = flow();
        let mut pending = device1_pending();
        let info = flow
            .begin(&mut pending, Some("198.51.100.5".parse().unwrap()))
            .await
            .unwrap();

        assert_eq!(pending.other_device_state_id, Some(info.login_id));
        let state = store.get(&info.login_id).await.unwrap().unwrap();
        assert_eq!(state.authn_context, Some(AuthnContextClass::RefedsMfa));
        assert_eq!(state.short_code, info.short_code);
    }

    #[tokio::test]
    async fn test_begin_is_idempotent_while_pending() {
        let (flow, _) = flow();
        let mut pending = device1_pending();
        let first = flow.begin(&mut pending, None).await.unwrap();
        let second = flow.begin(&mut pending, None).await.unwrap();
        assert_eq!(first.login_id, second.login_id);
        assert_eq!(first.short_code, second.short_code);
    }

    #[tokio::test]
    async fn test_join_by_short_code_with_proximity() {
        let (flow, _) = flow();
        let mut pending = device1_pending();
        let info = flow
            .begin(&mut pending, Some("198.51.100.5".parse().unwrap()))
            .await
            .unwrap();

        let join = flow
            .join(
                &TransactionRef::ShortCode(info.short_code.clone()),
                Some("198.51.100.200".parse().unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(join.device1_proximity, Some(DeviceProximity::Near));
        assert_eq!(join.context.state_id, info.login_id);
        assert_eq!(
            join.context.authn_context,
            Some(AuthnContextClass::RefedsMfa)
        );
    }

    #[tokio::test]
    async fn test_join_unknown_transaction() {
        let (flow, _) = flow();
        let err = flow
            .join(&TransactionRef::ShortCode("000000".to_string()), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoginError::OtherDevice(OtherDeviceError::UnknownState)
        ));
    }

    #[tokio::test]
    async fn test_submit_before_device2_completes_is_not_ready() {
        let (flow, _) = flow();
        let mut pending = device1_pending();
        flow.begin(&mut pending, None).await.unwrap();
        let outcome = flow
            .submit_response_code(&mut pending, "123456")
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::NotReady);
    }

    #[tokio::test]
    async fn test_correct_code_adopts_authentication() {
        let (flow, _) = flow();
        let mut pending = device1_pending();
        let info = flow.begin(&mut pending, None).await.unwrap();

        let join = flow
            .join(&TransactionRef::LoginId(info.login_id), None)
            .await
            .unwrap();
        let code = flow
            .complete_on_device2(
                &join.context,
                &Eppn::new("hubba-bubba"),
                &[CredentialKey::new("pw-1"), CredentialKey::new("fido-hi")],
            )
            .await
            .unwrap();

        match flow.submit_response_code(&mut pending, &code).await.unwrap() {
            SubmitOutcome::Accepted {
                eppn,
                credentials_used,
            } => {
                assert_eq!(eppn, Eppn::new("hubba-bubba"));
                assert_eq!(credentials_used.len(), 2);
            }
            other => panic!("expected Accepted, got {other:?}"),
        }
        assert_eq!(pending.eppn, Some(Eppn::new("hubba-bubba")));
        assert!(pending
            .credentials_used
            .contains_key(&CredentialKey::new("fido-hi")));

        // the transaction is finished; a replay cannot adopt again
        let err = flow
            .submit_response_code(&mut pending, &code)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoginError::OtherDevice(OtherDeviceError::AlreadyCompleted)
        ));
    }

    #[tokio::test]
    async fn test_attempt_ceiling_aborts() {
        let (flow, store) = flow();
        let mut pending = device1_pending();
        let info = flow.begin(&mut pending, None).await.unwrap();
        let join = flow
            .join(&TransactionRef::LoginId(info.login_id), None)
            .await
            .unwrap();
        flow.complete_on_device2(&join.context, &Eppn::new("hubba-bubba"), &[])
            .await
            .unwrap();

        for attempt in 1..=2u32 {
            let outcome = flow
                .submit_response_code(&mut pending, "wrong!")
                .await
                .unwrap();
            assert_eq!(
                outcome,
                SubmitOutcome::Incorrect {
                    bad_attempts: attempt
                }
            );
        }
        let err = flow
            .submit_response_code(&mut pending, "wrong!")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoginError::OtherDevice(OtherDeviceError::TooManyAttempts)
        ));

        let state = store.get(&info.login_id).await.unwrap().unwrap();
        assert_eq!(state.status, OtherDeviceStatus::Aborted);
        assert!(pending.eppn.is_none());
    }

    #[tokio::test]
    async fn test_abort_pending_kills_linked_transaction() {
        let (flow, store) = flow();
        let mut pending = device1_pending();

        // nothing linked yet: a no-op
        flow.abort_pending(&pending).await.unwrap();

        let info = flow.begin(&mut pending, None).await.unwrap();
        flow.abort_pending(&pending).await.unwrap();
        let state = store.get(&info.login_id).await.unwrap().unwrap();
        assert_eq!(state.status, OtherDeviceStatus::Aborted);

        // still fine after the transaction is dead
        flow.abort_pending(&pending).await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let (flow, _) = flow();
        let mut pending = device1_pending();
        let info = flow.begin(&mut pending, None).await.unwrap();
        flow.abort(&info.login_id).await.unwrap();
        flow.abort(&info.login_id).await.unwrap();

        // an aborted transaction cannot be joined
        let err = flow
            .join(&TransactionRef::LoginId(info.login_id), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoginError::OtherDevice(OtherDeviceError::AlreadyCompleted)
        ));
    }
}
