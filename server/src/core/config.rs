//! Validated configuration for the client and the authorization responder
//!
//! The CLI layer hands over raw flag/env values; everything here is resolved
//! into plain validated values at startup: file-sourced secrets are read,
//! `KEY=VALUE` pairs are parsed, authorize/upload endpoints are derived from
//! the collector URL, and misconfiguration (an anonymize label without a
//! salt, no destination) fails before anything runs.

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Url;

use super::cli::{AuthServerArgs, ClientArgs};
use super::constants::{
    AUTHORIZE_PATH, DEFAULT_AUTH_LISTEN, DEFAULT_CLIENT_LISTEN, DEFAULT_CREDENTIAL_MAX_AGE_SECS,
    DEFAULT_GRANT_TTL_SECS, DEFAULT_INTERVAL_SECS, DEFAULT_LIMIT_BYTES, DEFAULT_MATCH_RULE,
    DEFAULT_RENAME, FEDERATE_PATH, STALENESS_WINDOW_HOURS, UPLOAD_PATH,
};
use crate::data::grants::SavedGrant;
use crate::domain::metricset::LabelSet;
use crate::domain::transform::{
    AnonymizeLabels, DropStaleSamples, InjectLabels, LabelSource, PackMetrics, RenameMetrics,
    SortMetrics, TransformChain,
};
use crate::utils::crypto::generate_signing_key;

/// Anonymization settings. Constructing this type requires a salt, so the
/// stage can never run without one.
#[derive(Debug, Clone)]
pub struct AnonymizeConfig {
    pub salt: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub listen: Option<SocketAddr>,
    pub from: Url,
    pub from_token: Option<String>,
    pub from_ca: Option<Vec<u8>>,
    pub to_authorize: Url,
    pub to_upload: Url,
    pub to_token: Option<String>,
    pub rules: Vec<String>,
    pub renames: HashMap<String, String>,
    pub labels: LabelSet,
    pub anonymize: Option<AnonymizeConfig>,
    pub interval: Duration,
    pub limit_bytes: usize,
    pub credential_max_age: Duration,
}

impl ClientConfig {
    pub fn load(args: &ClientArgs) -> Result<Self> {
        let from_str = args.from.clone().ok_or_else(|| {
            anyhow!("a Prometheus server to federate from is required (e.g. --from http://localhost:9090)")
        })?;
        let mut from = Url::parse(&from_str).context("--from is not a valid URL")?;
        let path = from.path().trim_end_matches('/').to_string();
        if path.is_empty() {
            from.set_path(FEDERATE_PATH);
        } else {
            from.set_path(&path);
        }

        let from_token = resolve_secret(
            args.from_token.as_deref(),
            args.from_token_file.as_deref(),
            "--from-token-file",
        )?;
        let to_token = resolve_secret(
            args.to_token.as_deref(),
            args.to_token_file.as_deref(),
            "--to-token-file",
        )?;
        let anonymize_salt = resolve_secret(
            args.anonymize_salt.as_deref(),
            args.anonymize_salt_file.as_deref(),
            "--anonymize-salt-file",
        )?;

        let from_ca = match &args.from_ca_file {
            Some(path) => Some(fs::read(path).with_context(|| {
                format!("can't read --from-ca-file {}", path.display())
            })?),
            None => None,
        };

        let anonymize = if args.anonymize_labels.is_empty() {
            None
        } else {
            let salt = anonymize_salt.ok_or_else(|| {
                anyhow!("--anonymize-salt is required when --anonymize-label is used")
            })?;
            Some(AnonymizeConfig {
                salt,
                labels: args.anonymize_labels.clone(),
            })
        };

        let labels: LabelSet = parse_pairs(&args.labels, "--label")?.into_iter().collect();

        let rename_flags = if args.renames.is_empty() {
            vec![DEFAULT_RENAME.to_string()]
        } else {
            args.renames.clone()
        };
        let renames: HashMap<String, String> =
            parse_pairs(&rename_flags, "--rename")?.into_iter().collect();

        let mut rules = args.match_rules.clone();
        if let Some(path) = &args.match_file {
            let data = fs::read_to_string(path).with_context(|| {
                format!("--match-file could not be loaded: {}", path.display())
            })?;
            rules.extend(data.lines().map(str::to_string));
        }
        let mut rules: Vec<String> = rules
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if rules.is_empty() {
            rules.push(DEFAULT_MATCH_RULE.to_string());
        }

        let to = args
            .to
            .as_deref()
            .map(|s| Url::parse(s).context("--to is not a valid URL"))
            .transpose()?;
        let to_authorize = match &args.to_auth {
            Some(s) => Url::parse(s).context("--to-auth is not a valid URL")?,
            None => match &to {
                Some(to) => {
                    let mut url = join_path(to, AUTHORIZE_PATH);
                    if let Some(id) = &args.id {
                        url.query_pairs_mut().append_pair("id", id);
                    }
                    url
                }
                None => bail!("either --to or both --to-auth and --to-upload must be specified"),
            },
        };
        let to_upload = match &args.to_upload {
            Some(s) => Url::parse(s).context("--to-upload is not a valid URL")?,
            None => match &to {
                Some(to) => join_path(to, UPLOAD_PATH),
                None => bail!("either --to or both --to-auth and --to-upload must be specified"),
            },
        };

        let listen = match args.listen.as_deref() {
            Some("") => None,
            Some(s) => Some(s.parse().context("--listen is not a valid host:port")?),
            None => Some(
                DEFAULT_CLIENT_LISTEN
                    .parse()
                    .context("default listen address")?,
            ),
        };

        Ok(Self {
            listen,
            from,
            from_token,
            from_ca,
            to_authorize,
            to_upload,
            to_token,
            rules,
            renames,
            labels,
            anonymize,
            interval: Duration::from_secs(args.interval.unwrap_or(DEFAULT_INTERVAL_SECS)),
            limit_bytes: args.limit_bytes.unwrap_or(DEFAULT_LIMIT_BYTES),
            credential_max_age: Duration::from_secs(
                args.credential_max_age
                    .unwrap_or(DEFAULT_CREDENTIAL_MAX_AGE_SECS),
            ),
        })
    }

    /// Build the transformer chain in its canonical order: label injection,
    /// anonymization, renaming, staleness drop, packing, deterministic
    /// ordering.
    pub fn transforms(&self, label_source: Option<Arc<dyn LabelSource>>) -> TransformChain {
        let mut chain = TransformChain::default();
        if !self.labels.is_empty() || label_source.is_some() {
            chain.push(InjectLabels::new(self.labels.clone(), label_source));
        }
        if let Some(anonymize) = &self.anonymize {
            chain.push(AnonymizeLabels::new(
                anonymize.salt.clone(),
                anonymize.labels.clone(),
            ));
        }
        if !self.renames.is_empty() {
            chain.push(RenameMetrics::new(self.renames.clone()));
        }
        chain.push(DropStaleSamples::new(chrono::Duration::hours(
            STALENESS_WINDOW_HOURS,
        )));
        chain.push(PackMetrics);
        chain.push(SortMetrics);
        chain
    }
}

pub struct AuthServerConfig {
    pub listen: SocketAddr,
    pub grants: Vec<SavedGrant>,
    pub allow_new_clusters: bool,
    pub signing_key: Vec<u8>,
    pub grant_ttl: Duration,
}

impl AuthServerConfig {
    pub fn load(args: &AuthServerArgs) -> Result<Self> {
        let listen = args
            .listen
            .as_deref()
            .unwrap_or(DEFAULT_AUTH_LISTEN)
            .parse()
            .context("--listen is not a valid host:port")?;

        let grants = match &args.grants_file {
            Some(path) => {
                let data = fs::read_to_string(path).with_context(|| {
                    format!("unable to read --grants-file {}", path.display())
                })?;
                serde_json::from_str::<Vec<SavedGrant>>(&data).with_context(|| {
                    format!("unable to parse contents of {}", path.display())
                })?
            }
            None => Vec::new(),
        };

        let signing_key = match resolve_secret(
            args.signing_key.as_deref(),
            args.signing_key_file.as_deref(),
            "--signing-key-file",
        )? {
            Some(encoded) => hex::decode(encoded.trim())
                .context("--signing-key is not a valid hex-encoded key")?,
            None => {
                tracing::warn!(
                    "no signing key provided, generated an ephemeral one; \
                     minted grants will not verify across restarts"
                );
                generate_signing_key()
            }
        };

        Ok(Self {
            listen,
            grants,
            allow_new_clusters: args.allow_new_clusters,
            signing_key,
            grant_ttl: Duration::from_secs(args.grant_ttl.unwrap_or(DEFAULT_GRANT_TTL_SECS)),
        })
    }
}

/// Resolve a secret given inline or as a file, preferring the inline value.
/// File contents are trimmed of surrounding whitespace.
fn resolve_secret(
    inline: Option<&str>,
    file: Option<&Path>,
    flag: &str,
) -> Result<Option<String>> {
    if let Some(value) = inline
        && !value.is_empty()
    {
        return Ok(Some(value.to_string()));
    }
    if let Some(path) = file {
        let data = fs::read_to_string(path)
            .with_context(|| format!("unable to read {} {}", flag, path.display()))?;
        return Ok(Some(data.trim().to_string()));
    }
    Ok(None)
}

fn parse_pairs(flags: &[String], flag: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for raw in flags {
        if raw.is_empty() {
            continue;
        }
        let Some((key, value)) = raw.split_once('=') else {
            bail!("{} must be of the form KEY=VALUE: {}", flag, raw);
        };
        pairs.push((key.to_string(), value.to_string()));
    }
    Ok(pairs)
}

/// Append a path segment to a base URL, keeping existing path components.
fn join_path(base: &Url, segment: &str) -> Url {
    let mut url = base.clone();
    let path = base.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}/{}", path, segment));
    url
}
