//! Authorization grant table (collector side)
//!
//! Maps an opaque (bearer token, cluster) identity to a signed access grant.
//! The table is process-wide state shared across inbound requests: lookups
//! for different keys never block each other, and dynamic registration for
//! the same unseen key is first-writer-wins; later concurrent callers
//! observe the first writer's response. Pre-provisioned grants are reloaded
//! from configuration on restart; everything else is volatile.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::metricset::LabelSet;

/// Access grant issued by the authorization responder: a short-lived access
/// token plus the labels the issuer requires on every subsequent push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<u64>,
    #[serde(default)]
    pub labels: LabelSet,
}

/// Lookup key: exact-equality match on the (token, cluster) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub token: String,
    pub cluster: String,
}

/// One pre-provisioned grant as stored in the responder's JSON grants file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedGrant {
    pub token: String,
    pub cluster: String,
    pub response: TokenResponse,
}

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("unknown token or cluster")]
    UnknownCredential,
    #[error("failed to sign access grant: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct GrantClaims {
    sub: String,
    iat: i64,
    exp: i64,
    jti: String,
}

pub struct GrantTable {
    grants: DashMap<ClusterKey, TokenResponse>,
    allow_new_clusters: bool,
    signing_key: Vec<u8>,
    grant_ttl: Duration,
}

impl GrantTable {
    pub fn new(signing_key: Vec<u8>, allow_new_clusters: bool, grant_ttl: Duration) -> Self {
        Self {
            grants: DashMap::new(),
            allow_new_clusters,
            signing_key,
            grant_ttl,
        }
    }

    /// Load pre-provisioned grants. Returns the number of entries inserted.
    pub fn load(&self, saved: Vec<SavedGrant>) -> usize {
        let mut inserted = 0;
        for grant in saved {
            self.grants.insert(
                ClusterKey {
                    token: grant.token,
                    cluster: grant.cluster,
                },
                grant.response,
            );
            inserted += 1;
        }
        inserted
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Resolve a (token, cluster) identity to its access grant.
    ///
    /// A pre-provisioned or previously minted entry is returned as-is. For an
    /// unseen key, a new grant is minted and persisted when dynamic
    /// registration is enabled, so repeated calls with the same key are
    /// idempotent; otherwise the lookup fails with an unknown-credential
    /// error that callers must surface as a rejection.
    pub fn authorize(&self, token: &str, cluster: &str) -> Result<TokenResponse, GrantError> {
        let key = ClusterKey {
            token: token.to_string(),
            cluster: cluster.to_string(),
        };
        if let Some(found) = self.grants.get(&key) {
            return Ok(found.clone());
        }
        if !self.allow_new_clusters {
            return Err(GrantError::UnknownCredential);
        }

        // entry() holds the shard lock, so the first writer wins and
        // concurrent callers for the same key observe its response
        match self.grants.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let response = self.mint(cluster)?;
                entry.insert(response.clone());
                Ok(response)
            }
        }
    }

    /// Mint a signed access grant for a newly registered cluster.
    fn mint(&self, cluster: &str) -> Result<TokenResponse, GrantError> {
        let now = Utc::now().timestamp();
        let claims = GrantClaims {
            sub: cluster.to_string(),
            iat: now,
            exp: now + self.grant_ttl.as_secs() as i64,
            jti: Uuid::new_v4().to_string(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.signing_key),
        )?;

        let mut labels = LabelSet::new();
        labels.insert("cluster".to_string(), cluster.to_string());

        Ok(TokenResponse {
            token,
            expires_in_seconds: Some(self.grant_ttl.as_secs()),
            labels,
        })
    }
}
