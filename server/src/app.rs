//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::server;
use crate::core::cli::{self, Commands};
use crate::core::config::{AuthServerConfig, ClientConfig};
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::federation::{MetricsClient, RotatingCredentials};
use crate::data::grants::GrantTable;
use crate::domain::forward::ForwardWorker;

pub struct CoreApp;

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        match cli::parse() {
            Commands::Client(args) => {
                let config = ClientConfig::load(&args)?;
                Self::run_client(config).await
            }
            Commands::AuthServer(args) => {
                let config = AuthServerConfig::load(&args)?;
                Self::run_auth_server(config).await
            }
        }
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn run_client(config: ClientConfig) -> Result<()> {
        let from_client = MetricsClient::new(
            config.limit_bytes,
            config.interval,
            config.from_ca.as_deref(),
        )
        .context("failed to build the source client")?;
        let to_client = MetricsClient::new(config.limit_bytes, config.interval, None)
            .context("failed to build the collector client")?;

        let credentials = match &config.to_token {
            Some(token) => Some(Arc::new(
                RotatingCredentials::new(
                    config.to_authorize.clone(),
                    token.clone(),
                    config.interval,
                    config.credential_max_age,
                )
                .context("failed to build the rotating authorization client")?,
            )),
            None => None,
        };

        let worker = Arc::new(ForwardWorker::new(
            &config,
            from_client,
            to_client,
            credentials,
        ));

        let shutdown = ShutdownService::new();
        shutdown.install_signal_handlers();

        tracing::info!(
            from = %config.from,
            to = %config.to_upload,
            interval_secs = config.interval.as_secs(),
            "starting metrelay client"
        );
        shutdown
            .register(worker.clone().start(shutdown.subscribe()))
            .await;

        match config.listen {
            Some(listen) => server::serve_client(listen, worker, shutdown.clone()).await?,
            None => shutdown.wait().await,
        }

        shutdown.shutdown().await;
        Ok(())
    }

    async fn run_auth_server(config: AuthServerConfig) -> Result<()> {
        let grants = Arc::new(GrantTable::new(
            config.signing_key,
            config.allow_new_clusters,
            config.grant_ttl,
        ));
        let provisioned = grants.load(config.grants);

        let shutdown = ShutdownService::new();
        shutdown.install_signal_handlers();

        tracing::info!(
            provisioned,
            allow_new_clusters = config.allow_new_clusters,
            "starting authorization responder"
        );
        server::serve_auth(config.listen, grants, shutdown.clone()).await?;

        shutdown.shutdown().await;
        Ok(())
    }
}
