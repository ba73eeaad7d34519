// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "metrelay";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "METRELAY_LOG";

// =============================================================================
// Environment Variables
// =============================================================================

/// Environment variable for the local listen address
pub const ENV_LISTEN: &str = "METRELAY_LISTEN";

/// Environment variable for the source federation URL
pub const ENV_FROM: &str = "METRELAY_FROM";

/// Environment variable for the source bearer token
pub const ENV_FROM_TOKEN: &str = "METRELAY_FROM_TOKEN";

/// Environment variable for the destination collector URL
pub const ENV_TO: &str = "METRELAY_TO";

/// Environment variable for the destination bearer token
pub const ENV_TO_TOKEN: &str = "METRELAY_TO_TOKEN";

/// Environment variable for the anonymization salt
pub const ENV_ANONYMIZE_SALT: &str = "METRELAY_ANONYMIZE_SALT";

/// Environment variable for the responder's grant signing key (hex)
pub const ENV_SIGNING_KEY: &str = "METRELAY_SIGNING_KEY";

// =============================================================================
// Client Defaults
// =============================================================================

/// Default listen address for the client's health and inspection endpoints
pub const DEFAULT_CLIENT_LISTEN: &str = "127.0.0.1:9002";

/// Default push interval. Prometheus returns the last 5 minutes of samples
/// from the federation endpoint, so the interval stays under that.
pub const DEFAULT_INTERVAL_SECS: u64 = 270;

/// Default ceiling on retrieved and pushed payload sizes (200 KiB)
pub const DEFAULT_LIMIT_BYTES: usize = 200 * 1024;

/// Default match rule when none is configured
pub const DEFAULT_MATCH_RULE: &str = r#"{__name__="up"}"#;

/// Default rename mapping when none is configured
pub const DEFAULT_RENAME: &str = "ALERTS=alerts";

/// Federation path appended to `--from` when it carries none
pub const FEDERATE_PATH: &str = "/federate";

/// Path segment of the derived authorize endpoint
pub const AUTHORIZE_PATH: &str = "authorize";

/// Path segment of the derived upload endpoint
pub const UPLOAD_PATH: &str = "upload";

// =============================================================================
// Transforms
// =============================================================================

/// Look-back window for the staleness drop stage. A federation source may
/// return last-known values this old; anything older is discarded.
pub const STALENESS_WINDOW_HOURS: i64 = 24;

// =============================================================================
// Credentials
// =============================================================================

/// Implicit maximum age of a rotated upload credential when the collector
/// declares no expiry (overridable via `--credential-max-age`)
pub const DEFAULT_CREDENTIAL_MAX_AGE_SECS: u64 = 10 * 60;

// =============================================================================
// Authorization Responder Defaults
// =============================================================================

/// Default listen address for the authorization responder
pub const DEFAULT_AUTH_LISTEN: &str = "127.0.0.1:9001";

/// Default lifetime of dynamically minted access grants
pub const DEFAULT_GRANT_TTL_SECS: u64 = 3600;

// =============================================================================
// Shutdown
// =============================================================================

/// Graceful shutdown timeout in seconds
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
