//! Wire client for federation retrieval and push
//!
//! Timeout-bound HTTP retrieval and push of metric family batches in the
//! text exposition format. Both directions enforce a byte-size ceiling; the
//! size-limit failure is a distinct error kind so operators can tell it
//! apart from transport or protocol failures.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use thiserror::Error;

use crate::domain::metricset::exposition::{self, ParseError};
use crate::domain::metricset::MetricFamily;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    /// The upstream rejected the presented credential. Kept separate from
    /// `Status` so callers can invalidate a rotated token and re-exchange on
    /// the next cycle.
    #[error("credential rejected with status {0}")]
    Unauthorized(StatusCode),
    #[error("payload exceeded the size limit of {limit} bytes")]
    SizeLimit { limit: usize },
    #[error("failed to decode exposition payload: {0}")]
    Parse(#[from] ParseError),
}

pub struct MetricsClient {
    http: reqwest::Client,
    limit_bytes: usize,
}

impl MetricsClient {
    /// Build a client with a per-call timeout and an optional additional CA
    /// certificate (PEM) for verifying the remote endpoint.
    pub fn new(
        limit_bytes: usize,
        timeout: Duration,
        ca_pem: Option<&[u8]>,
    ) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(pem) = ca_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }
        Ok(Self {
            http: builder.build()?,
            limit_bytes,
        })
    }

    /// Retrieve metric families matching the given selector rules.
    ///
    /// Rules are OR-combined by the federation endpoint via repeated
    /// `match[]` query parameters.
    pub async fn retrieve(
        &self,
        endpoint: &Url,
        rules: &[String],
        bearer: Option<&str>,
    ) -> Result<Vec<MetricFamily>, ClientError> {
        let mut request = self.http.get(endpoint.clone());
        for rule in rules {
            request = request.query(&[("match[]", rule)]);
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Unauthorized(status));
        }
        if !status.is_success() {
            return Err(ClientError::Status(status));
        }

        let body = self.read_limited(response).await?;
        let text = String::from_utf8(body).map_err(|_| ParseError::InvalidUtf8)?;
        Ok(exposition::parse(&text)?)
    }

    /// Push a batch of metric families, authenticated with the given access
    /// token when present.
    pub async fn push(
        &self,
        endpoint: &Url,
        access_token: Option<&str>,
        families: &[MetricFamily],
    ) -> Result<(), ClientError> {
        let body = exposition::encode(families);
        if body.len() > self.limit_bytes {
            return Err(ClientError::SizeLimit {
                limit: self.limit_bytes,
            });
        }

        let mut request = self
            .http
            .post(endpoint.clone())
            .header(CONTENT_TYPE, exposition::CONTENT_TYPE)
            .body(body);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Unauthorized(status));
        }
        if !status.is_success() {
            return Err(ClientError::Status(status));
        }
        Ok(())
    }

    /// Read a response body, aborting once the size ceiling is crossed so a
    /// misbehaving endpoint cannot balloon memory.
    async fn read_limited(&self, response: reqwest::Response) -> Result<Vec<u8>, ClientError> {
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > self.limit_bytes {
                return Err(ClientError::SizeLimit {
                    limit: self.limit_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}
