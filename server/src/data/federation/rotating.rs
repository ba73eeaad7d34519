//! Rotating authorization client
//!
//! Exchanges a long-lived bearer credential for a short-lived upload
//! credential at the collector's authorize endpoint and caches the result
//! for concurrent reuse. The cache is guarded by a single async mutex held
//! across both the validity check and the write-back after a refresh, so a
//! burst of callers at expiry produces exactly one exchange: the first
//! caller past the check performs it while the rest wait on the lock.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::data::grants::TokenResponse;
use crate::domain::metricset::LabelSet;
use crate::domain::transform::LabelSource;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("token exchange transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The authorize endpoint rejected the bearer credential. Not retried
    /// within the call; the fixed forwarding schedule is the retry mechanism.
    #[error("authorization rejected with status {0}")]
    Rejected(StatusCode),
    #[error("authorize endpoint returned unexpected status {0}")]
    Status(StatusCode),
}

enum CredentialState {
    Empty,
    Valid {
        grant: TokenResponse,
        expires_at: Instant,
    },
    Denied,
}

pub struct RotatingCredentials {
    http: reqwest::Client,
    authorize_url: Url,
    bearer_token: String,
    /// Implicit credential lifetime cap; governs when the server declares a
    /// longer expiry or none at all.
    max_age: Duration,
    state: Mutex<CredentialState>,
}

impl RotatingCredentials {
    pub fn new(
        authorize_url: Url,
        bearer_token: String,
        timeout: Duration,
        max_age: Duration,
    ) -> Result<Self, CredentialError> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            authorize_url,
            bearer_token,
            max_age,
            state: Mutex::new(CredentialState::Empty),
        })
    }

    /// Return the current access grant, exchanging the bearer token for a
    /// fresh one when none is cached or the cached one has expired.
    pub async fn grant(&self) -> Result<TokenResponse, CredentialError> {
        let mut state = self.state.lock().await;

        if let CredentialState::Valid { grant, expires_at } = &*state
            && Instant::now() < *expires_at
        {
            return Ok(grant.clone());
        }
        if matches!(*state, CredentialState::Denied) {
            tracing::debug!("credential was denied earlier, attempting a fresh exchange");
        }

        match self.exchange().await {
            Ok(grant) => {
                let ttl = grant
                    .expires_in_seconds
                    .map(Duration::from_secs)
                    .map_or(self.max_age, |declared| declared.min(self.max_age));
                tracing::debug!(ttl_secs = ttl.as_secs(), "cached fresh access grant");
                *state = CredentialState::Valid {
                    grant: grant.clone(),
                    expires_at: Instant::now() + ttl,
                };
                Ok(grant)
            }
            Err(CredentialError::Rejected(status)) => {
                *state = CredentialState::Denied;
                Err(CredentialError::Rejected(status))
            }
            // transport or protocol failure: keep whatever state we had so a
            // transient outage does not look like a rejection
            Err(err) => Err(err),
        }
    }

    /// Drop the cached grant so the next call re-exchanges. Called when a
    /// push is rejected with the cached token.
    pub async fn invalidate(&self) {
        *self.state.lock().await = CredentialState::Empty;
    }

    async fn exchange(&self) -> Result<TokenResponse, CredentialError> {
        let response = self
            .http
            .post(self.authorize_url.clone())
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CredentialError::Rejected(status));
        }
        if !status.is_success() {
            return Err(CredentialError::Status(status));
        }
        Ok(response.json::<TokenResponse>().await?)
    }
}

/// The collector-assigned labels that must be attached to every push travel
/// with the grant; exposing them here is how they reach the label-injection
/// transform stage.
#[async_trait]
impl LabelSource for RotatingCredentials {
    async fn labels(&self) -> anyhow::Result<LabelSet> {
        Ok(self.grant().await?.labels)
    }
}
