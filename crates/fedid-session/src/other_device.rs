//! The cross-device login transaction model.
//!
//! An [`OtherDeviceState`] pairs a browser that cannot comfortably
//! authenticate ("device 1") with a second device that does the actual
//! proving ("device 2"). It is the one document in this system that two
//! independent actors race on, so after creation it is only ever touched
//! through the targeted mutations on
//! [`OtherDeviceStore`](crate::OtherDeviceStore).

use chrono::{DateTime, Duration, Utc};
use fedid_core::{AuthnContextClass, CredentialKey, Eppn, OtherDeviceId};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::str::FromStr;

/// Lifecycle of a cross-device transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtherDeviceStatus {
    /// Waiting for device 2 to authenticate.
    #[default]
    Pending,
    /// Device 2 finished authenticating; a response code is bound.
    Authenticated,
    /// Device 1 presented the correct response code; terminal.
    Finished,
    /// Explicitly aborted by either device, or killed by the
    /// bad-attempt ceiling; terminal.
    Aborted,
}

impl OtherDeviceStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OtherDeviceStatus::Pending => "pending",
            OtherDeviceStatus::Authenticated => "authenticated",
            OtherDeviceStatus::Finished => "finished",
            OtherDeviceStatus::Aborted => "aborted",
        }
    }

    /// Terminal states can never transition again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OtherDeviceStatus::Finished | OtherDeviceStatus::Aborted
        )
    }
}

impl Display for OtherDeviceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OtherDeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OtherDeviceStatus::Pending),
            "authenticated" => Ok(OtherDeviceStatus::Authenticated),
            "finished" => Ok(OtherDeviceStatus::Finished),
            "aborted" => Ok(OtherDeviceStatus::Aborted),
            other => Err(format!("unknown other-device status: {other}")),
        }
    }
}

/// The shared, server-side cross-device transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherDeviceState {
    /// Handed to device 2 via QR code or URL.
    pub login_id: OtherDeviceId,
    /// Human-typable identifier shown to the user. Not a secret.
    pub short_code: String,
    pub status: OtherDeviceStatus,
    /// Bound once device 2 authenticates.
    pub eppn: Option<Eppn>,
    /// The context requested by the SP on device 1.
    pub authn_context: Option<AuthnContextClass>,
    pub reauthn_required: bool,
    /// Credential keys proven on device 2.
    pub credentials_used: Vec<CredentialKey>,
    /// Secret confirmation code, set at most once when device 2
    /// completes. Compared against device-1 submissions, never revealed
    /// to device 1.
    pub response_code: Option<String>,
    /// Failed response-code submissions from device 1.
    pub bad_attempts: u32,
    /// Address device 1 was using when it started the transaction, for
    /// proximity classification on device 2.
    pub device1_ip: Option<IpAddr>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OtherDeviceState {
    /// Create a fresh transaction for a device-1 pending login.
    #[must_use]
    pub fn new(
        authn_context: Option<AuthnContextClass>,
        reauthn_required: bool,
        device1_ip: Option<IpAddr>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            login_id: OtherDeviceId::new(),
            short_code: make_short_code(),
            status: OtherDeviceStatus::Pending,
            eppn: None,
            authn_context,
            reauthn_required,
            credentials_used: Vec::new(),
            response_code: None,
            bad_attempts: 0,
            device1_ip,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Seconds until the TTL discards this transaction.
    #[must_use]
    pub fn expires_in(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == OtherDeviceStatus::Pending && !self.is_expired()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.status == OtherDeviceStatus::Authenticated && !self.is_expired()
    }
}

impl Display for OtherDeviceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<OtherDeviceState: login_id={}, status={}, bad_attempts={}, expires_at={}>",
            self.login_id,
            self.status,
            self.bad_attempts,
            self.expires_at.to_rfc3339()
        )
    }
}

/// Six decimal digits from four bytes of OS randomness.
#[must_use]
pub fn make_short_code() -> String {
    let mut bytes = [0u8; 4];
    OsRng.fill_bytes(&mut bytes);
    let digits = u32::from_be_bytes(bytes) % 1_000_000;
    format!("{digits:06}")
}

/// The secret confirmation code minted when device 2 completes. Same
/// shape as the short code so it is comfortable to type, but guarded by
/// the bad-attempt ceiling.
#[must_use]
pub fn make_response_code() -> String {
    make_short_code()
}
