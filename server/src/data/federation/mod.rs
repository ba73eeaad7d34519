//! Federation wire client and rotating authorization

pub mod client;
pub mod rotating;

pub use client::{ClientError, MetricsClient};
pub use rotating::{CredentialError, RotatingCredentials};
