// =============================================================================
// config.rs — KNOBS FOR THE SHIPMENT ENGINE
// =============================================================================
//
// Where the backend lives, who we are when we talk to it, how often we look
// again, and what (if anything) to do on startup.
//
// Everything comes from the environment, prefixed SHIPMENT_ENGINE_, with a
// `.env` file honoured when present. Defaults are chosen so a local backend
// on port 8000 works without setting anything but the shipment and role.
// =============================================================================

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{Action, ShipmentId};

#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // BACKEND
    // =========================================================================

    /// REST API root. Endpoint paths are joined onto it.
    /// Default: http://localhost:8000/api
    pub api_base_url: String,

    /// Session token, sent as the `access_token` cookie. The backend keeps
    /// auth in an HTTP-only cookie, so this is the only way in for a
    /// non-browser client.
    pub access_token: Option<String>,

    /// Sent as `X-Client-Version` on every request.
    pub client_version: String,

    /// Per-request timeout enforced by the HTTP client. Default: 15 seconds.
    pub request_timeout: Duration,

    // =========================================================================
    // REFETCH LOOP
    // =========================================================================

    /// How often the daemon refetches the shipment. Default: 30 seconds.
    pub poll_interval: Duration,

    /// Consecutive refetch failures before the breaker opens. Default: 5.
    pub circuit_breaker_failure_threshold: u32,

    /// How long an open breaker waits before probing again. Default: 60 seconds.
    pub circuit_breaker_reset_timeout: Duration,

    /// Successful probes needed to close the breaker again. Default: 2.
    pub circuit_breaker_success_threshold: u32,

    // =========================================================================
    // SESSION
    // =========================================================================

    /// Where the "has rated" flags are kept between runs.
    pub rating_cache_path: PathBuf,

    /// `cargo_owner` or `transporter`, as the backend spells it.
    pub user_type: Option<String>,

    pub shipment_id: Option<ShipmentId>,

    // =========================================================================
    // ONE-SHOT ACTION
    // =========================================================================

    /// Performed once after the initial load, if set and available.
    pub action: Option<Action>,
    pub cancel_reason: Option<String>,
    pub rating: Option<u8>,
    pub rating_comment: Option<String>,

    // =========================================================================
    // LOGGING
    // =========================================================================

    /// Emit JSON log lines instead of the human format.
    pub log_json: bool,
}

impl Config {
    /// Load configuration from the environment (and `.env`, if there is one).
    ///
    /// Malformed numbers fall back to their defaults. An unknown action name
    /// is dropped with the rest of the config intact; `main` logs it.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Config {
            api_base_url: env_or_default(
                "SHIPMENT_ENGINE_API_BASE_URL",
                "http://localhost:8000/api",
            ),
            access_token: env_opt("SHIPMENT_ENGINE_ACCESS_TOKEN"),
            client_version: env_or_default(
                "SHIPMENT_ENGINE_CLIENT_VERSION",
                env!("CARGO_PKG_VERSION"),
            ),
            request_timeout: Duration::from_secs(
                env_or_default("SHIPMENT_ENGINE_REQUEST_TIMEOUT_SECS", "15").parse().unwrap_or(15)
            ),

            poll_interval: poll_interval_from(&env_or_default("SHIPMENT_ENGINE_POLL_SECS", "30")),
            circuit_breaker_failure_threshold: env_or_default(
                "SHIPMENT_ENGINE_CB_FAILURE_THRESHOLD", "5"
            ).parse().unwrap_or(5),
            circuit_breaker_reset_timeout: Duration::from_secs(
                env_or_default("SHIPMENT_ENGINE_CB_RESET_TIMEOUT_SECS", "60").parse().unwrap_or(60)
            ),
            circuit_breaker_success_threshold: env_or_default(
                "SHIPMENT_ENGINE_CB_SUCCESS_THRESHOLD", "2"
            ).parse().unwrap_or(2),

            rating_cache_path: PathBuf::from(env_or_default(
                "SHIPMENT_ENGINE_RATING_CACHE_PATH",
                ".shipment_ratings.json",
            )),
            user_type: env_opt("SHIPMENT_ENGINE_USER_TYPE"),
            shipment_id: env_opt("SHIPMENT_ENGINE_SHIPMENT_ID")
                .and_then(|raw| raw.parse::<ShipmentId>().ok()),

            action: env_opt("SHIPMENT_ENGINE_ACTION").and_then(|raw| raw.parse::<Action>().ok()),
            cancel_reason: env_opt("SHIPMENT_ENGINE_CANCEL_REASON"),
            rating: env_opt("SHIPMENT_ENGINE_RATING").and_then(|raw| raw.parse().ok()),
            rating_comment: env_opt("SHIPMENT_ENGINE_RATING_COMMENT"),

            log_json: parse_bool(&env_or_default("SHIPMENT_ENGINE_LOG_JSON", "false")),
        }
    }

    /// The raw `SHIPMENT_ENGINE_ACTION` value, for reporting one that did not parse.
    pub fn raw_action() -> Option<String> {
        env_opt("SHIPMENT_ENGINE_ACTION")
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Unset and blank are the same thing.
fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Whole seconds, never below one so the refetch loop cannot spin.
fn poll_interval_from(raw: &str) -> Duration {
    Duration::from_secs(raw.trim().parse::<u64>().unwrap_or(30).max(1))
}
