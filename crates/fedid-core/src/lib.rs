//! fedid core library
//!
//! Shared types for the fedid identity provider core.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (`SsoSessionId`, `OtherDeviceId`, `RequestRef`, ...)
//! - [`authn_context`] - Authentication context classes and assurance attribute values
//! - [`config`] - Policy configuration loaded from the environment

pub mod authn_context;
pub mod config;
pub mod ids;

pub use authn_context::{
    AuthnContextClass, UnknownAuthnContext, ASSURANCE_REQUIREMENT_ATTRIBUTE, SWAMID_AL1,
    SWAMID_AL2, SWAMID_AL2_MFA_HI, SWEDEN_CONNECT_LOA3,
};
pub use config::{ConfigError, FedidConfig};
pub use ids::{CredentialKey, Eppn, OtherDeviceId, RequestRef, SsoSessionId};
