//! API route handlers

pub mod authorize;
pub mod federate;
pub mod health;
