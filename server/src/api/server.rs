//! API server initialization

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::routes::{authorize, federate, health};
use crate::core::ShutdownService;
use crate::data::grants::GrantTable;
use crate::domain::forward::ForwardWorker;

/// Serve the client's local endpoints: liveness and the last-batch
/// inspection view.
pub async fn serve_client(
    listen: SocketAddr,
    worker: Arc<ForwardWorker>,
    shutdown: ShutdownService,
) -> Result<()> {
    let router = Router::new()
        .route("/healthz", get(health::health))
        .merge(federate::routes(worker))
        .layer(TraceLayer::new_for_http());

    serve(listen, router, shutdown).await
}

/// Serve the authorization responder.
pub async fn serve_auth(
    listen: SocketAddr,
    grants: Arc<GrantTable>,
    shutdown: ShutdownService,
) -> Result<()> {
    let router = Router::new()
        .route("/healthz", get(health::health))
        .merge(authorize::routes(grants))
        .layer(TraceLayer::new_for_http());

    serve(listen, router, shutdown).await
}

async fn serve(listen: SocketAddr, router: Router, shutdown: ShutdownService) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    tracing::info!(addr = %listen, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.wait())
        .await?;
    Ok(())
}
