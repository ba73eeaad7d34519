//! API server and routes

pub mod routes;
pub mod server;
