//! Durable state for the fedid IdP authentication core.
//!
//! Two kinds of server-side documents live here:
//!
//! - [`SsoSession`]: the record of an established authentication that
//!   lets a user skip re-authentication at subsequent SPs within its TTL.
//! - [`OtherDeviceState`]: the shared cross-device ("QR code") login
//!   transaction, raced on by two independent devices.
//!
//! Both come with an in-memory store (tests, single-node deployments)
//! and a PostgreSQL store. Expired documents are never returned by
//! lookups, whether or not the cleanup job has run yet.

pub mod error;
pub mod other_device;
pub mod other_device_store;
pub mod sso_session;
pub mod sso_store;

pub use error::{MutateError, StoreError};
pub use other_device::{make_response_code, make_short_code, OtherDeviceState, OtherDeviceStatus};
pub use other_device_store::{InMemoryOtherDeviceStore, OtherDeviceStore, PostgresOtherDeviceStore};
pub use sso_session::{AuthnData, ExternalMfaData, SsoSession};
pub use sso_store::{InMemorySsoSessionStore, PostgresSsoSessionStore, SsoSessionStore};
