//! Inspection endpoint
//!
//! Read-only view of the worker's last successfully pushed batch, in the
//! text exposition format. Local diagnostics only; not authenticated and
//! not required for correctness of federation.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;

use crate::domain::forward::ForwardWorker;
use crate::domain::metricset::exposition;

#[derive(Clone)]
pub struct FederateState {
    pub worker: Arc<ForwardWorker>,
}

/// Serve the last successfully pushed batch
pub async fn last_metrics(State(state): State<FederateState>) -> impl IntoResponse {
    let batch = state.worker.last_batch();
    (
        [(header::CONTENT_TYPE, exposition::CONTENT_TYPE)],
        exposition::encode(&batch),
    )
}

/// Build the inspection routes
pub fn routes(worker: Arc<ForwardWorker>) -> Router<()> {
    Router::new()
        .route("/federate", get(last_metrics))
        .with_state(FederateState { worker })
}
