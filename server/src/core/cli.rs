use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::constants::{
    ENV_ANONYMIZE_SALT, ENV_FROM, ENV_FROM_TOKEN, ENV_LISTEN, ENV_SIGNING_KEY, ENV_TO,
    ENV_TO_TOKEN,
};

#[derive(Parser)]
#[command(name = "metrelay")]
#[command(version, about = "Federate Prometheus metrics via push", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the forwarding client: scrape a federation endpoint, transform the
    /// batch, and push it to a collector on a fixed interval
    Client(ClientArgs),
    /// Run the collector-side authorization responder
    AuthServer(AuthServerArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ClientArgs {
    /// host:port for the local health and inspection endpoints. Empty
    /// disables the local server.
    #[arg(long, env = ENV_LISTEN)]
    pub listen: Option<String>,

    /// The Prometheus server to federate from
    #[arg(long, env = ENV_FROM)]
    pub from: Option<String>,

    /// Bearer token for authenticating to the source server
    #[arg(long, env = ENV_FROM_TOKEN)]
    pub from_token: Option<String>,

    /// File containing a bearer token for the source server
    #[arg(long)]
    pub from_token_file: Option<PathBuf>,

    /// File containing an additional CA certificate for verifying the source
    #[arg(long)]
    pub from_ca_file: Option<PathBuf>,

    /// Unique identifier sent with the authorize request
    #[arg(long)]
    pub id: Option<String>,

    /// The collector to send metrics to; authorize and upload endpoints are
    /// derived from it
    #[arg(long, env = ENV_TO)]
    pub to: Option<String>,

    /// Explicit collector upload endpoint (overrides derivation from --to)
    #[arg(long)]
    pub to_upload: Option<String>,

    /// Explicit collector authorize endpoint (overrides derivation from --to)
    #[arg(long)]
    pub to_auth: Option<String>,

    /// Bearer token exchanged for an upload credential at the authorize
    /// endpoint
    #[arg(long, env = ENV_TO_TOKEN)]
    pub to_token: Option<String>,

    /// File containing the bearer token for the collector
    #[arg(long)]
    pub to_token_file: Option<PathBuf>,

    /// Seconds between scrapes
    #[arg(long)]
    pub interval: Option<u64>,

    /// Ceiling on retrieved and pushed payload sizes in bytes
    #[arg(long)]
    pub limit_bytes: Option<usize>,

    /// Match rules to federate (repeatable)
    #[arg(long = "match")]
    pub match_rules: Vec<String>,

    /// File containing match rules, one per line
    #[arg(long)]
    pub match_file: Option<PathBuf>,

    /// Labels to add to every outgoing sample, in key=value form (repeatable)
    #[arg(long = "label")]
    pub labels: Vec<String>,

    /// Rename metrics before sending, in OLD=NEW form. Defaults to
    /// ALERTS=alerts.
    #[arg(long = "rename")]
    pub renames: Vec<String>,

    /// Label names whose values are anonymized before sending (repeatable)
    #[arg(long = "anonymize-label")]
    pub anonymize_labels: Vec<String>,

    /// Secret, unguessable value used to anonymize label values
    #[arg(long, env = ENV_ANONYMIZE_SALT)]
    pub anonymize_salt: Option<String>,

    /// File containing the anonymization salt
    #[arg(long)]
    pub anonymize_salt_file: Option<PathBuf>,

    /// Seconds a rotated upload credential is kept when the collector
    /// declares no expiry
    #[arg(long)]
    pub credential_max_age: Option<u64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct AuthServerArgs {
    /// host:port to listen on
    #[arg(long, env = ENV_LISTEN)]
    pub listen: Option<String>,

    /// JSON file of pre-provisioned grants: [{token, cluster, response}]
    #[arg(long)]
    pub grants_file: Option<PathBuf>,

    /// Mint grants for unknown (token, cluster) pairs instead of rejecting
    /// them
    #[arg(long)]
    pub allow_new_clusters: bool,

    /// Hex-encoded key for signing minted grants; generated when absent
    #[arg(long, env = ENV_SIGNING_KEY)]
    pub signing_key: Option<String>,

    /// File containing the hex-encoded signing key
    #[arg(long)]
    pub signing_key_file: Option<PathBuf>,

    /// Lifetime of minted grants in seconds
    #[arg(long)]
    pub grant_ttl: Option<u64>,
}

/// Parse CLI arguments
pub fn parse() -> Commands {
    Cli::parse().command
}
