//! Login orchestration for the fedid IdP.
//!
//! Everything between "an SP redirected a user here" and "a session
//! exists and an assertion can be built":
//!
//! - [`context`]: the in-flight login context and pending-request model,
//! - [`assurance`]: the resolver turning credentials proven into an
//!   authentication context and assurance attributes, or a typed refusal,
//! - [`sequencer`]: the ordered steps (password, second factor, terms of
//!   use) a login must pass, with loop protection,
//! - [`other_device_flow`]: the cross-device ("QR code") login protocol,
//! - [`collaborators`]: boundary traits for the directory, credential
//!   verification, pending actions and terms-of-use systems.

pub mod assurance;
pub mod collaborators;
pub mod context;
pub mod credentials;
pub mod error;
pub mod other_device_flow;
pub mod proximity;
pub mod sequencer;

pub use assurance::{requested_authn_context, resolve_authn_context, AuthnInfo, AuthnState};
pub use collaborators::{
    CredentialVerifier, DirectoryUser, InMemoryCredentialVerifier, InMemoryPendingActions,
    InMemoryTouStore, InMemoryUserDirectory, PendingActionsChecker, TouStore, UserDirectory,
    VerifiedCredential,
};
pub use context::{LoginContext, OtherDeviceLoginContext, PendingRequest, SamlLoginContext};
pub use credentials::{
    CredentialKind, OnetimeCredential, ProofingMethod, UsedCredential, UsedWhere,
};
pub use error::{AssuranceError, LoginError, OtherDeviceError};
pub use other_device_flow::{
    JoinInfo, OtherDeviceFlow, PairingInfo, SubmitOutcome, TransactionRef,
};
pub use proximity::{classify_proximity, DeviceProximity};
pub use sequencer::{LoginSequencer, LoginStep, SequencerOutcome};
