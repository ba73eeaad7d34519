//! Scheduled forwarding worker

mod worker;

pub use worker::{ForwardError, ForwardWorker};
