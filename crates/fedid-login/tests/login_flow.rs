//! End-to-end login flows: SP-initiated password and MFA logins,
//! cross-device login driven on both devices, and single-logout fan-out.

use chrono::Utc;
use fedid_core::{AuthnContextClass, CredentialKey, Eppn, FedidConfig, SWAMID_AL1, SWAMID_AL2};
use fedid_login::{
    CredentialKind, CredentialVerifier, DirectoryUser, InMemoryCredentialVerifier,
    InMemoryPendingActions, InMemoryTouStore, InMemoryUserDirectory, LoginContext, LoginSequencer,
    LoginStep, OtherDeviceFlow, PendingRequest, ProofingMethod, SamlLoginContext,
    SequencerOutcome, SubmitOutcome, TransactionRef,
};
use fedid_session::{
    InMemoryOtherDeviceStore, InMemorySsoSessionStore, OtherDeviceStore, SsoSession,
    SsoSessionStore,
};
use std::collections::HashMap;
use std::sync::Arc;

const EPPN: &str = "hubba-bubba";

struct Idp {
    config: FedidConfig,
    sso_store: Arc<InMemorySsoSessionStore>,
    other_device_store: Arc<InMemoryOtherDeviceStore>,
    verifier: InMemoryCredentialVerifier,
    tou: Arc<InMemoryTouStore>,
    sequencer: LoginSequencer,
    other_device: OtherDeviceFlow,
}

async fn idp() -> Idp {
    let config = FedidConfig::default();
    let sso_store = Arc::new(InMemorySsoSessionStore::new());
    let other_device_store = Arc::new(InMemoryOtherDeviceStore::new());
    let directory = Arc::new(InMemoryUserDirectory::new());
    let actions = Arc::new(InMemoryPendingActions::new());
    let tou = Arc::new(InMemoryTouStore::new());
    let verifier = InMemoryCredentialVerifier::new();

    let mut credentials = HashMap::new();
    credentials.insert(CredentialKey::new("pw-1"), CredentialKind::Password);
    credentials.insert(
        CredentialKey::new("fido-hi"),
        CredentialKind::Fido {
            proofing: ProofingMethod::SwamidAl2MfaHi,
        },
    );
    directory
        .add_user(DirectoryUser {
            eppn: Eppn::new(EPPN),
            credentials,
            identity_verified: true,
        })
        .await;
    verifier
        .register(
            Eppn::new(EPPN),
            CredentialKey::new("pw-1"),
            "correct horse",
        )
        .await;
    tou.accept(Eppn::new(EPPN), config.tou_version.clone()).await;

    let sequencer = LoginSequencer::new(
        config.clone(),
        sso_store.clone(),
        directory.clone(),
        actions,
        tou.clone(),
    );
    let other_device = OtherDeviceFlow::new(config.clone(), other_device_store.clone());
    Idp {
        config,
        sso_store,
        other_device_store,
        verifier,
        tou,
        sequencer,
        other_device,
    }
}

fn sp_request(contexts: &[&str]) -> PendingRequest {
    PendingRequest::new(LoginContext::Saml(SamlLoginContext::new(
        "id-1",
        contexts.iter().map(|s| (*s).to_string()).collect(),
    )))
}

/// Run the password step against the verifier, the way a handler would.
async fn do_password_step(idp: &Idp, pending: &mut PendingRequest) {
    let verified = idp
        .verifier
        .verify(&Eppn::new(EPPN), &CredentialKey::new("pw-1"), "correct horse")
        .await
        .unwrap()
        .expect("password should verify");
    pending.eppn = Some(Eppn::new(EPPN));
    pending.record_credential(verified.key, verified.timestamp);
}

#[tokio::test]
async fn password_login_establishes_sso_session() {
    let idp = idp().await;
    let mut pending = sp_request(&["https://refeds.org/profile/sfa"]);

    let outcome = idp.sequencer.next_step(&mut pending, None).await.unwrap();
    assert!(matches!(outcome, SequencerOutcome::Step(LoginStep::PwAuth)));
    do_password_step(&idp, &mut pending).await;

    match idp.sequencer.next_step(&mut pending, None).await.unwrap() {
        SequencerOutcome::Finished {
            authn_info,
            session,
        } => {
            assert_eq!(authn_info.class_ref, AuthnContextClass::RefedsSfa);
            assert_eq!(
                authn_info.authn_attributes,
                vec![SWAMID_AL1.to_string(), SWAMID_AL2.to_string()]
            );
            let stored = idp
                .sso_store
                .get(&session.session_id)
                .await
                .unwrap()
                .expect("session must be persisted");
            assert_eq!(stored.eppn, Eppn::new(EPPN));
            assert_eq!(stored.authn_credentials.len(), 1);
        }
        other => panic!("expected Finished, got {other:?}"),
    }
}

#[tokio::test]
async fn mfa_login_walks_password_then_mfa() {
    let idp = idp().await;
    let mut pending = sp_request(&["https://refeds.org/profile/mfa"]);

    assert!(matches!(
        idp.sequencer.next_step(&mut pending, None).await.unwrap(),
        SequencerOutcome::Step(LoginStep::PwAuth)
    ));
    do_password_step(&idp, &mut pending).await;

    assert!(matches!(
        idp.sequencer.next_step(&mut pending, None).await.unwrap(),
        SequencerOutcome::Step(LoginStep::Mfa)
    ));
    pending.record_credential(CredentialKey::new("fido-hi"), Utc::now());

    match idp.sequencer.next_step(&mut pending, None).await.unwrap() {
        SequencerOutcome::Finished { authn_info, .. } => {
            assert_eq!(authn_info.class_ref, AuthnContextClass::RefedsMfa);
            assert!(authn_info
                .authn_attributes
                .iter()
                .any(|a| a.ends_with("swamid-al2-mfa-hi")));
        }
        other => panic!("expected Finished, got {other:?}"),
    }
}

#[tokio::test]
async fn sso_session_satisfies_second_sp() {
    let idp = idp().await;

    // first SP: full password login
    let mut first = sp_request(&["https://refeds.org/profile/sfa"]);
    assert!(matches!(
        idp.sequencer.next_step(&mut first, None).await.unwrap(),
        SequencerOutcome::Step(LoginStep::PwAuth)
    ));
    do_password_step(&idp, &mut first).await;
    let session = match idp.sequencer.next_step(&mut first, None).await.unwrap() {
        SequencerOutcome::Finished { session, .. } => session,
        other => panic!("expected Finished, got {other:?}"),
    };

    // second SP: the session alone finishes the login, no steps
    let mut second = sp_request(&["https://refeds.org/profile/sfa"]);
    match idp
        .sequencer
        .next_step(&mut second, Some(&session))
        .await
        .unwrap()
    {
        SequencerOutcome::Finished { session: s, .. } => {
            assert_eq!(s.session_id, session.session_id);
        }
        other => panic!("expected Finished, got {other:?}"),
    }
    assert!(second.visited_steps.is_empty());
}

#[tokio::test]
async fn stale_tou_forces_reacceptance() {
    let idp = idp().await;
    idp.tou
        .accept_at(
            Eppn::new(EPPN),
            idp.config.tou_version.clone(),
            Utc::now() - idp.config.tou_reaccept_interval() - chrono::Duration::days(1),
        )
        .await;

    let mut pending = sp_request(&[]);
    do_password_step(&idp, &mut pending).await;
    assert!(matches!(
        idp.sequencer.next_step(&mut pending, None).await.unwrap(),
        SequencerOutcome::Step(LoginStep::Tou)
    ));
}

#[tokio::test]
async fn cross_device_login_end_to_end() {
    let idp = idp().await;

    // device 1: SP login, user opts into cross-device
    let mut device1 = sp_request(&["https://refeds.org/profile/mfa"]);
    let pairing = idp
        .other_device
        .begin(&mut device1, Some("198.51.100.5".parse().unwrap()))
        .await
        .unwrap();
    assert_eq!(pairing.short_code.len(), 6);
    assert!(pairing.expires_in <= idp.config.other_device_ttl());

    // device 2: joins by short code from a nearby address
    let join = idp
        .other_device
        .join(
            &TransactionRef::ShortCode(pairing.short_code.clone()),
            Some("198.51.100.200".parse().unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(
        join.device1_proximity,
        Some(fedid_login::DeviceProximity::Near)
    );

    // device 2: full MFA login under its own context
    let mut device2 = PendingRequest::new(LoginContext::OtherDevice(join.context.clone()));
    assert!(matches!(
        idp.sequencer.next_step(&mut device2, None).await.unwrap(),
        SequencerOutcome::Step(LoginStep::PwAuth)
    ));
    do_password_step(&idp, &mut device2).await;
    assert!(matches!(
        idp.sequencer.next_step(&mut device2, None).await.unwrap(),
        SequencerOutcome::Step(LoginStep::Mfa)
    ));
    device2.record_credential(CredentialKey::new("fido-hi"), Utc::now());
    assert!(matches!(
        idp.sequencer.next_step(&mut device2, None).await.unwrap(),
        SequencerOutcome::Finished { .. }
    ));

    let response_code = idp
        .other_device
        .complete_on_device2(
            &join.context,
            &Eppn::new(EPPN),
            &[CredentialKey::new("pw-1"), CredentialKey::new("fido-hi")],
        )
        .await
        .unwrap();

    // device 1: one typo, then the correct code
    let outcome = idp
        .other_device
        .submit_response_code(&mut device1, "000000")
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Incorrect { bad_attempts: 1 });

    match idp
        .other_device
        .submit_response_code(&mut device1, &response_code)
        .await
        .unwrap()
    {
        SubmitOutcome::Accepted { eppn, .. } => assert_eq!(eppn, Eppn::new(EPPN)),
        other => panic!("expected Accepted, got {other:?}"),
    }

    // device 1's login now finishes through the normal sequencer
    match idp.sequencer.next_step(&mut device1, None).await.unwrap() {
        SequencerOutcome::Finished { authn_info, .. } => {
            assert_eq!(authn_info.class_ref, AuthnContextClass::RefedsMfa);
        }
        other => panic!("expected Finished, got {other:?}"),
    }
}

#[tokio::test]
async fn cross_device_attempt_ceiling_kills_transaction() {
    let idp = idp().await;
    let mut device1 = sp_request(&[]);
    let pairing = idp.other_device.begin(&mut device1, None).await.unwrap();
    let join = idp
        .other_device
        .join(&TransactionRef::LoginId(pairing.login_id), None)
        .await
        .unwrap();
    idp.other_device
        .complete_on_device2(&join.context, &Eppn::new(EPPN), &[])
        .await
        .unwrap();

    for _ in 0..2 {
        assert!(matches!(
            idp.other_device
                .submit_response_code(&mut device1, "000000")
                .await
                .unwrap(),
            SubmitOutcome::Incorrect { .. }
        ));
    }
    assert!(matches!(
        idp.other_device
            .submit_response_code(&mut device1, "000000")
            .await
            .unwrap_err(),
        fedid_login::LoginError::OtherDevice(fedid_login::OtherDeviceError::TooManyAttempts)
    ));

    // the aborted transaction is dead even for the correct code
    assert!(idp
        .other_device
        .submit_response_code(&mut device1, "000000")
        .await
        .is_err());
    let state = idp
        .other_device_store
        .get(&pairing.login_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, fedid_session::OtherDeviceStatus::Aborted);
}

#[tokio::test]
async fn single_logout_fans_out_over_all_sessions() {
    let idp = idp().await;
    let eppn = Eppn::new(EPPN);
    for _ in 0..3 {
        let session = SsoSession::new(eppn.clone(), idp.config.sso_session_ttl());
        idp.sso_store.save(&session).await.unwrap();
    }
    let other = SsoSession::new(Eppn::new("someone-else"), idp.config.sso_session_ttl());
    idp.sso_store.save(&other).await.unwrap();

    let sessions = idp.sso_store.get_all_for_user(&eppn).await.unwrap();
    assert_eq!(sessions.len(), 3);
    for session in &sessions {
        assert!(idp.sso_store.remove(&session.session_id).await.unwrap());
    }

    assert!(idp.sso_store.get_all_for_user(&eppn).await.unwrap().is_empty());
    // unrelated users keep their sessions
    assert!(idp.sso_store.get(&other.session_id).await.unwrap().is_some());
}
