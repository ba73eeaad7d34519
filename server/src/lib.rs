//! MetRelay: federated metrics forwarding with rotating authorization
//!
//! Scrapes a Prometheus federation endpoint on a fixed schedule, scrubs and
//! transforms the batch (label injection, anonymization, renaming, staleness
//! dropping, packing, deterministic ordering), exchanges a long-lived bearer
//! token for a short-lived upload credential, and pushes the result to a
//! collector. Also ships the collector-side authorization responder.

pub mod api;
mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
