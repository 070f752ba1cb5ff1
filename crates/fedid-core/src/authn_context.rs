//! Authentication context classes and assurance attribute values.
//!
//! The wire values here are fixed by federation policy and must match
//! bit-exact what relying parties expect in `AuthnContextClassRef` and
//! `eduPersonAssurance`.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// SWAMID assurance level 1 (asserted for every authenticated user).
pub const SWAMID_AL1: &str = "http://www.swamid.se/policy/assurance/al1";

/// SWAMID assurance level 2 (verified identity).
pub const SWAMID_AL2: &str = "http://www.swamid.se/policy/assurance/al2";

/// SWAMID high-assurance MFA marker.
pub const SWAMID_AL2_MFA_HI: &str = "http://www.swamid.se/policy/authentication/swamid-al2-mfa-hi";

/// Sweden Connect LOA3; an external MFA asserting this counts as
/// high-assurance MFA.
pub const SWEDEN_CONNECT_LOA3: &str = "http://id.elegnamnden.se/loa/1.0/loa3";

/// Legacy SP metadata entity attribute that overrides the requested
/// authentication context from the request itself.
pub const ASSURANCE_REQUIREMENT_ATTRIBUTE: &str = "http://www.swamid.se/assurance-requirement";

/// The authentication context classes this IdP knows how to assert.
///
/// Requested values outside this set are ignored (logged and skipped),
/// never errors: an SP asking for something exotic falls through to the
/// default resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AuthnContextClass {
    /// REFEDS MFA profile.
    RefedsMfa,
    /// REFEDS SFA profile.
    RefedsSfa,
    /// eduID MFA (multifactor without the SWAMID AL2-MFA requirement).
    EduidMfa,
    /// Legacy U2F context (password + FIDO token).
    FidoU2f,
    /// Plain password over protected transport.
    PasswordPt,
}

impl AuthnContextClass {
    /// The exact `AuthnContextClassRef` URI for this class.
    #[must_use]
    pub fn as_uri(&self) -> &'static str {
        match self {
            AuthnContextClass::RefedsMfa => "https://refeds.org/profile/mfa",
            AuthnContextClass::RefedsSfa => "https://refeds.org/profile/sfa",
            AuthnContextClass::EduidMfa => "https://eduid.se/specs/mfa",
            AuthnContextClass::FidoU2f => "https://www.swamid.se/specs/id-fido-u2f-ce-transports",
            AuthnContextClass::PasswordPt => {
                "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport"
            }
        }
    }
}

impl Display for AuthnContextClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_uri())
    }
}

/// Error for authn context URIs this IdP does not recognise.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown authnContextClassRef: {0}")]
pub struct UnknownAuthnContext(pub String);

impl FromStr for AuthnContextClass {
    type Err = UnknownAuthnContext;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "https://refeds.org/profile/mfa" => Ok(AuthnContextClass::RefedsMfa),
            "https://refeds.org/profile/sfa" => Ok(AuthnContextClass::RefedsSfa),
            "https://eduid.se/specs/mfa" => Ok(AuthnContextClass::EduidMfa),
            "https://www.swamid.se/specs/id-fido-u2f-ce-transports" => {
                Ok(AuthnContextClass::FidoU2f)
            }
            "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport" => {
                Ok(AuthnContextClass::PasswordPt)
            }
            other => Err(UnknownAuthnContext(other.to_string())),
        }
    }
}

impl TryFrom<String> for AuthnContextClass {
    type Error = UnknownAuthnContext;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AuthnContextClass> for String {
    fn from(c: AuthnContextClass) -> String {
        c.as_uri().to_string()
    }
}
