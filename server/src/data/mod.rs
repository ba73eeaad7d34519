//! Data layer
//!
//! External IO and process-wide state:
//! - `federation` - wire client and rotating authorization against remote
//!   collectors
//! - `grants` - the authorization responder's grant table

pub mod federation;
pub mod grants;

pub use federation::{ClientError, CredentialError, MetricsClient, RotatingCredentials};
pub use grants::{ClusterKey, GrantError, GrantTable, SavedGrant, TokenResponse};
