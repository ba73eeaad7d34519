//! Token-exchange endpoint (collector side)
//!
//! `POST /authorize?id=<cluster>` with `Authorization: Bearer <token>`.
//! Success returns the access grant as JSON; an unknown (token, cluster)
//! pair is rejected with 401 and is never masked as success.

use std::fmt;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde::Deserialize;
use serde_json::json;

use crate::data::grants::{GrantError, GrantTable, TokenResponse};

#[derive(Clone)]
pub struct AuthorizeState {
    pub grants: Arc<GrantTable>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub id: Option<String>,
}

/// Authorization error surfaced to clients
#[derive(Debug)]
pub enum AuthorizeError {
    /// No bearer token in the request
    MissingCredential,
    /// No cluster identifier in the request
    MissingCluster,
    /// The (token, cluster) pair matched no grant
    UnknownCredential,
    /// Grant minting failed
    Internal,
}

impl fmt::Display for AuthorizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredential => write!(f, "Authorization header required"),
            Self::MissingCluster => write!(f, "Cluster identifier required"),
            Self::UnknownCredential => write!(f, "Unknown token or cluster"),
            Self::Internal => write!(f, "Failed to issue access grant"),
        }
    }
}

impl IntoResponse for AuthorizeError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            Self::MissingCluster => (StatusCode::BAD_REQUEST, "CLUSTER_REQUIRED"),
            Self::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "GRANT_FAILED"),
            // don't leak whether the token or the cluster was wrong
            Self::MissingCredential | Self::UnknownCredential => {
                (StatusCode::UNAUTHORIZED, "CREDENTIAL_INVALID")
            }
        };
        let body = json!({
            "error": "unauthorized",
            "code": code,
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Exchange a (bearer token, cluster) identity for an access grant
pub async fn authorize(
    State(state): State<AuthorizeState>,
    Query(query): Query<AuthorizeQuery>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AuthorizeError> {
    let token = bearer_token(&headers).ok_or(AuthorizeError::MissingCredential)?;
    let cluster = query
        .id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(AuthorizeError::MissingCluster)?;

    match state.grants.authorize(token, cluster) {
        Ok(response) => {
            tracing::debug!(cluster, "issued access grant");
            Ok(Json(response))
        }
        Err(GrantError::UnknownCredential) => {
            tracing::debug!(cluster, "rejected unknown credential");
            Err(AuthorizeError::UnknownCredential)
        }
        Err(e) => {
            tracing::error!(error = %e, cluster, "failed to mint access grant");
            Err(AuthorizeError::Internal)
        }
    }
}

/// Extract the bearer token from the Authorization header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Build the authorization responder routes
pub fn routes(grants: Arc<GrantTable>) -> Router<()> {
    Router::new()
        .route("/authorize", post(authorize))
        .with_state(AuthorizeState { grants })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::HeaderValue;

    use super::*;
    use crate::data::grants::SavedGrant;
    use crate::domain::metricset::model::label_set;

    fn table(allow_new_clusters: bool) -> Arc<GrantTable> {
        let table = GrantTable::new(vec![1u8; 32], allow_new_clusters, Duration::from_secs(60));
        table.load(vec![SavedGrant {
            token: "bearer-1".to_string(),
            cluster: "prod-1".to_string(),
            response: TokenResponse {
                token: "upload-1".to_string(),
                expires_in_seconds: Some(600),
                labels: label_set(&[("cluster", "prod-1")]),
            },
        }]);
        Arc::new(table)
    }

    fn headers(value: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(v) = value {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_str(v).unwrap());
        }
        headers
    }

    #[tokio::test]
    async fn test_known_identity_gets_its_grant() {
        let state = AuthorizeState {
            grants: table(false),
        };
        let Json(response) = authorize(
            State(state),
            Query(AuthorizeQuery {
                id: Some("prod-1".to_string()),
            }),
            headers(Some("Bearer bearer-1")),
        )
        .await
        .unwrap();
        assert_eq!(response.token, "upload-1");
        assert_eq!(response.labels["cluster"], "prod-1");
    }

    #[tokio::test]
    async fn test_scheme_is_case_insensitive() {
        let state = AuthorizeState {
            grants: table(false),
        };
        let result = authorize(
            State(state),
            Query(AuthorizeQuery {
                id: Some("prod-1".to_string()),
            }),
            headers(Some("bearer bearer-1")),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_identity_is_unauthorized() {
        let state = AuthorizeState {
            grants: table(false),
        };
        let err = authorize(
            State(state),
            Query(AuthorizeQuery {
                id: Some("prod-1".to_string()),
            }),
            headers(Some("Bearer wrong")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthorizeError::UnknownCredential));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let state = AuthorizeState {
            grants: table(false),
        };
        let err = authorize(
            State(state),
            Query(AuthorizeQuery {
                id: Some("prod-1".to_string()),
            }),
            headers(None),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthorizeError::MissingCredential));
    }

    #[tokio::test]
    async fn test_missing_cluster_is_bad_request() {
        let state = AuthorizeState {
            grants: table(false),
        };
        let err = authorize(
            State(state),
            Query(AuthorizeQuery { id: None }),
            headers(Some("Bearer bearer-1")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthorizeError::MissingCluster));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dynamic_registration_issues_a_grant() {
        let state = AuthorizeState {
            grants: table(true),
        };
        let Json(response) = authorize(
            State(state.clone()),
            Query(AuthorizeQuery {
                id: Some("edge-9".to_string()),
            }),
            headers(Some("Bearer fresh")),
        )
        .await
        .unwrap();
        assert_eq!(response.labels["cluster"], "edge-9");

        // a second call returns the persisted grant
        let Json(again) = authorize(
            State(state),
            Query(AuthorizeQuery {
                id: Some("edge-9".to_string()),
            }),
            headers(Some("Bearer fresh")),
        )
        .await
        .unwrap();
        assert_eq!(again, response);
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(
            bearer_token(&headers(Some("Bearer abc"))),
            Some("abc")
        );
        assert_eq!(bearer_token(&headers(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&headers(Some("Bearer "))), None);
        assert_eq!(bearer_token(&headers(None)), None);
    }
}
