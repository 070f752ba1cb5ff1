//! Error taxonomy for the login core.
//!
//! Assurance errors are policy refusals surfaced to the SP; cross-device
//! errors are terminal for their transaction and make the user restart
//! the pairing; store errors are fatal for the current request and never
//! downgraded to "not authenticated".

use crate::sequencer::LoginStep;
use fedid_core::{Eppn, RequestRef};
use fedid_session::StoreError;
use thiserror::Error;

/// The proven credentials do not satisfy the requested authentication
/// context. Carries the request reference so the refusal can be
/// correlated with the SP request it answers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssuranceError {
    /// No single factor at all was proven.
    #[error("no single factor proven for request {request_ref}")]
    MissingSingleFactor { request_ref: RequestRef },

    /// The requested context demands a password factor.
    #[error("no password factor proven for request {request_ref}")]
    MissingPasswordFactor { request_ref: RequestRef },

    /// The requested context demands a second factor.
    #[error("no second factor proven for request {request_ref}")]
    MissingMultiFactor { request_ref: RequestRef },

    /// A second factor was proven, but not one meeting the SWAMID
    /// AL2-MFA proofing requirement.
    #[error("second factor does not meet proofing requirement for request {request_ref}")]
    WrongMultiFactor { request_ref: RequestRef },

    /// Nothing usable was proven and no fallback applies.
    #[error("no authentication proven for request {request_ref}")]
    MissingAuthentication { request_ref: RequestRef },
}

impl AssuranceError {
    #[must_use]
    pub fn request_ref(&self) -> RequestRef {
        match self {
            AssuranceError::MissingSingleFactor { request_ref }
            | AssuranceError::MissingPasswordFactor { request_ref }
            | AssuranceError::MissingMultiFactor { request_ref }
            | AssuranceError::WrongMultiFactor { request_ref }
            | AssuranceError::MissingAuthentication { request_ref } => *request_ref,
        }
    }
}

/// Terminal cross-device transaction failures. The user restarts the
/// pairing; nothing here is retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OtherDeviceError {
    /// The login id or short code matches no live transaction.
    #[error("unknown cross-device login state")]
    UnknownState,

    /// The transaction passed its TTL.
    #[error("cross-device login state has expired")]
    Expired,

    /// The response-code attempt ceiling was reached; the transaction
    /// has been aborted.
    #[error("too many incorrect response-code attempts")]
    TooManyAttempts,

    /// The transaction already reached a terminal state.
    #[error("cross-device login already completed or aborted")]
    AlreadyCompleted,
}

/// Top-level failure of a login operation.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Assurance(#[from] AssuranceError),

    #[error(transparent)]
    OtherDevice(#[from] OtherDeviceError),

    /// The sequencer computed a step that was already visited in this
    /// transaction. Fatal abort, never silently retried.
    #[error("login step {step} repeated for request {request_ref}, aborting")]
    LoopDetected {
        request_ref: RequestRef,
        step: LoginStep,
    },

    /// The directory has no user for the authenticated subject.
    #[error("unknown user {0}")]
    UnknownUser(Eppn),

    #[error(transparent)]
    Store(#[from] StoreError),
}
