//! Forwarding worker
//!
//! Owns the federation schedule: each tick retrieves from the source, runs
//! the transformer chain, ensures an upload credential, and pushes to the
//! collector. Ticks are independent: failure at any stage abandons the
//! cycle and the schedule simply continues at the next interval boundary, so
//! one bad scrape or a slow collector never takes the worker down. At most
//! one cycle is in flight per worker; missed ticks are not queued.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use reqwest::Url;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::core::config::ClientConfig;
use crate::data::federation::{ClientError, CredentialError, MetricsClient, RotatingCredentials};
use crate::domain::metricset::MetricFamily;
use crate::domain::transform::{LabelSource, Transform, TransformChain, TransformError};

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("retrieval from source failed: {0}")]
    Retrieve(#[source] ClientError),
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("authorization failed: {0}")]
    Authorize(#[source] CredentialError),
    #[error("push to collector failed: {0}")]
    Push(#[source] ClientError),
}

pub struct ForwardWorker {
    from: Url,
    from_token: Option<String>,
    rules: Vec<String>,
    to_upload: Url,
    from_client: MetricsClient,
    to_client: MetricsClient,
    credentials: Option<Arc<RotatingCredentials>>,
    transforms: TransformChain,
    interval: Duration,
    /// Last successfully pushed batch, swapped atomically after each full
    /// cycle. Readers clone the Arc and never block the next cycle.
    last_batch: RwLock<Arc<Vec<MetricFamily>>>,
}

impl ForwardWorker {
    pub fn new(
        config: &ClientConfig,
        from_client: MetricsClient,
        to_client: MetricsClient,
        credentials: Option<Arc<RotatingCredentials>>,
    ) -> Self {
        let label_source = credentials
            .clone()
            .map(|c| c as Arc<dyn LabelSource>);
        Self {
            from: config.from.clone(),
            from_token: config.from_token.clone(),
            rules: config.rules.clone(),
            to_upload: config.to_upload.clone(),
            from_client,
            to_client,
            credentials,
            transforms: config.transforms(label_source),
            interval: config.interval,
            last_batch: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Snapshot of the most recently pushed batch, for the inspection
    /// endpoint.
    pub fn last_batch(&self) -> Arc<Vec<MetricFamily>> {
        self.last_batch.read().clone()
    }

    /// Run the forwarding schedule until shutdown is signaled.
    ///
    /// A randomized initial delay bounded by the interval staggers workers
    /// that start simultaneously, so a fleet does not stampede the
    /// collector.
    pub fn start(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let initial_delay = {
                let mut rng = rand::thread_rng();
                Duration::from_millis(rng.gen_range(0..self.interval.as_millis().max(1) as u64))
            };
            tracing::info!(
                delay_ms = initial_delay.as_millis() as u64,
                interval_secs = self.interval.as_secs(),
                "starting forwarder"
            );

            tokio::select! {
                _ = tokio::time::sleep(initial_delay) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }
            }

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.cycle().await {
                            tracing::warn!(error = %e, "forward cycle abandoned");
                        }
                    }
                }
            }
            tracing::debug!("forwarder stopped");
        })
    }

    /// One forwarding cycle: retrieve, transform, authorize, push.
    async fn cycle(&self) -> Result<(), ForwardError> {
        let mut batch = self
            .from_client
            .retrieve(&self.from, &self.rules, self.from_token.as_deref())
            .await
            .map_err(ForwardError::Retrieve)?;

        self.transforms.apply(&mut batch).await?;

        let access_token = match &self.credentials {
            Some(credentials) => Some(
                credentials
                    .grant()
                    .await
                    .map_err(ForwardError::Authorize)?
                    .token,
            ),
            None => None,
        };

        match self
            .to_client
            .push(&self.to_upload, access_token.as_deref(), &batch)
            .await
        {
            Ok(()) => {}
            Err(ClientError::Unauthorized(status)) => {
                // the cached grant went stale server-side; drop it so the
                // next cycle re-exchanges
                if let Some(credentials) = &self.credentials {
                    credentials.invalidate().await;
                }
                return Err(ForwardError::Push(ClientError::Unauthorized(status)));
            }
            Err(e) => return Err(ForwardError::Push(e)),
        }

        tracing::debug!(families = batch.len(), "pushed batch");
        *self.last_batch.write() = Arc::new(batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Json;
    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use chrono::Utc;
    use parking_lot::Mutex;
    use tokio::net::TcpListener;

    use super::*;
    use crate::core::config::ClientConfig;
    use crate::data::grants::TokenResponse;
    use crate::domain::metricset::model::label_set;

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn url(addr: SocketAddr, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", addr, path)).unwrap()
    }

    fn config(source: SocketAddr, collector: SocketAddr, to_token: Option<&str>) -> ClientConfig {
        ClientConfig {
            listen: None,
            from: url(source, "/federate"),
            from_token: None,
            from_ca: None,
            to_authorize: url(collector, "/authorize"),
            to_upload: url(collector, "/upload"),
            to_token: to_token.map(str::to_string),
            rules: vec![r#"{__name__="up"}"#.to_string()],
            renames: [("ALERTS".to_string(), "alerts".to_string())]
                .into_iter()
                .collect(),
            labels: label_set(&[("cluster", "demo")]),
            anonymize: None,
            interval: Duration::from_secs(60),
            limit_bytes: 200 * 1024,
            credential_max_age: Duration::from_secs(300),
        }
    }

    fn clients() -> (MetricsClient, MetricsClient) {
        (
            MetricsClient::new(200 * 1024, Duration::from_secs(5), None).unwrap(),
            MetricsClient::new(200 * 1024, Duration::from_secs(5), None).unwrap(),
        )
    }

    fn source_router(body: String) -> Router {
        Router::new().route(
            "/federate",
            get(move || {
                let body = body.clone();
                async move { body }
            }),
        )
    }

    #[derive(Clone, Default)]
    struct CollectorState {
        uploads: Arc<Mutex<Vec<(Option<String>, String)>>>,
        exchanges: Arc<AtomicUsize>,
        reject_uploads: bool,
    }

    fn collector_router(state: CollectorState) -> Router {
        async fn upload(
            State(state): State<CollectorState>,
            request: axum::extract::Request,
        ) -> axum::response::Response {
            let auth = request
                .headers()
                .get("authorization")
                .map(|v| v.to_str().unwrap().to_string());
            let body = axum::body::to_bytes(request.into_body(), usize::MAX)
                .await
                .unwrap();
            state
                .uploads
                .lock()
                .push((auth, String::from_utf8(body.to_vec()).unwrap()));
            if state.reject_uploads {
                StatusCode::UNAUTHORIZED.into_response()
            } else {
                StatusCode::OK.into_response()
            }
        }

        async fn authorize(State(state): State<CollectorState>) -> Json<TokenResponse> {
            let n = state.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
            Json(TokenResponse {
                token: format!("grant-{}", n),
                expires_in_seconds: None,
                labels: label_set(&[("cluster", "assigned")]),
            })
        }

        Router::new()
            .route("/upload", post(upload))
            .route("/authorize", post(authorize))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_cycle_renames_labels_sorts_and_pushes() {
        let t0 = Utc::now().timestamp_millis();
        let source = serve(source_router(format!(
            "# TYPE up gauge\nup{{job=\"a\"}} 1 {t0}\n# TYPE ALERTS gauge\nALERTS{{alertname=\"Foo\"}} 1 {t0}\n"
        )))
        .await;
        let state = CollectorState::default();
        let collector = serve(collector_router(state.clone())).await;

        let (from_client, to_client) = clients();
        let worker = ForwardWorker::new(
            &config(source, collector, None),
            from_client,
            to_client,
            None,
        );
        worker.cycle().await.unwrap();

        let uploads = state.uploads.lock();
        assert_eq!(uploads.len(), 1);
        let (auth, body) = &uploads[0];
        assert!(auth.is_none());
        assert_eq!(
            body,
            &format!(
                "# TYPE alerts gauge\nalerts{{alertname=\"Foo\",cluster=\"demo\"}} 1 {t0}\n# TYPE up gauge\nup{{cluster=\"demo\",job=\"a\"}} 1 {t0}\n"
            )
        );

        // snapshot reflects the pushed batch
        let last = worker.last_batch();
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].name, "alerts");
        assert_eq!(last[1].name, "up");
    }

    #[tokio::test]
    async fn test_cycle_authorizes_and_reuses_cached_grant() {
        let t0 = Utc::now().timestamp_millis();
        let source = serve(source_router(format!(
            "# TYPE up gauge\nup{{job=\"a\"}} 1 {t0}\n"
        )))
        .await;
        let state = CollectorState::default();
        let collector = serve(collector_router(state.clone())).await;

        let cfg = config(source, collector, Some("bearer"));
        let credentials = Arc::new(
            RotatingCredentials::new(
                cfg.to_authorize.clone(),
                "bearer".to_string(),
                Duration::from_secs(5),
                cfg.credential_max_age,
            )
            .unwrap(),
        );
        let (from_client, to_client) = clients();
        let worker = ForwardWorker::new(&cfg, from_client, to_client, Some(credentials));

        worker.cycle().await.unwrap();
        worker.cycle().await.unwrap();

        // one exchange serves both cycles
        assert_eq!(state.exchanges.load(Ordering::SeqCst), 1);
        let uploads = state.uploads.lock();
        assert_eq!(uploads.len(), 2);
        for (auth, body) in uploads.iter() {
            assert_eq!(auth.as_deref(), Some("Bearer grant-1"));
            // the collector-assigned label wins over the static one
            assert!(body.contains("cluster=\"assigned\""));
        }
    }

    #[tokio::test]
    async fn test_rejected_push_invalidates_credential() {
        let source = serve(source_router("# TYPE up gauge\nup 1\n".to_string())).await;
        let state = CollectorState {
            reject_uploads: true,
            ..CollectorState::default()
        };
        let collector = serve(collector_router(state.clone())).await;

        let cfg = config(source, collector, Some("bearer"));
        let credentials = Arc::new(
            RotatingCredentials::new(
                cfg.to_authorize.clone(),
                "bearer".to_string(),
                Duration::from_secs(5),
                cfg.credential_max_age,
            )
            .unwrap(),
        );
        let (from_client, to_client) = clients();
        let worker = ForwardWorker::new(&cfg, from_client, to_client, Some(credentials));

        let err = worker.cycle().await.unwrap_err();
        assert!(matches!(
            err,
            ForwardError::Push(ClientError::Unauthorized(_))
        ));
        let err = worker.cycle().await.unwrap_err();
        assert!(matches!(err, ForwardError::Push(_)));

        // the stale grant was dropped after the first rejection
        assert_eq!(state.exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_retrieval_leaves_snapshot_untouched() {
        let source = serve(Router::new().route(
            "/federate",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        let state = CollectorState::default();
        let collector = serve(collector_router(state.clone())).await;

        let (from_client, to_client) = clients();
        let worker = ForwardWorker::new(
            &config(source, collector, None),
            from_client,
            to_client,
            None,
        );

        let err = worker.cycle().await.unwrap_err();
        assert!(matches!(err, ForwardError::Retrieve(_)));
        assert!(worker.last_batch().is_empty());
        assert!(state.uploads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_stops_on_shutdown() {
        let source = serve(source_router("up 1\n".to_string())).await;
        let state = CollectorState::default();
        let collector = serve(collector_router(state)).await;

        let (from_client, to_client) = clients();
        let mut cfg = config(source, collector, None);
        cfg.interval = Duration::from_secs(3600);
        let worker = Arc::new(ForwardWorker::new(&cfg, from_client, to_client, None));

        let (tx, rx) = watch::channel(false);
        let handle = worker.start(rx);
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_rules_are_forwarded_to_the_source() {
        let queries: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = queries.clone();
        let source = serve(
            Router::new().route(
                "/federate",
                get(
                    |State(seen): State<Arc<Mutex<Vec<String>>>>,
                     request: axum::extract::Request| async move {
                        seen.lock()
                            .push(request.uri().query().unwrap_or("").to_string());
                        "up 1\n"
                    },
                )
                .with_state(seen.clone()),
            ),
        )
        .await;
        let state = CollectorState::default();
        let collector = serve(collector_router(state)).await;

        let (from_client, to_client) = clients();
        let mut cfg = config(source, collector, None);
        cfg.rules = vec!["{job=\"etcd\"}".to_string(), "up".to_string()];
        let worker = ForwardWorker::new(&cfg, from_client, to_client, None);
        worker.cycle().await.unwrap();

        let recorded = queries.lock();
        assert_eq!(recorded.len(), 1);
        let query = &recorded[0];
        assert_eq!(query.matches("match%5B%5D=").count(), 2);
    }
}
