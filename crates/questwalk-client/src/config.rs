//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a session can start with zero
//! configuration against a local backend.

use std::time::Duration;

use questwalk_shared::constants::{
    DEFAULT_ARRIVAL_THRESHOLD_M, LOCATION_POLL_INTERVAL_SECS,
    LOCATION_TIMEOUT_SECS, REROUTE_DISTANCE_M, RPC_TIMEOUT_SECS,
};
use questwalk_shared::types::TravelMode;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the quest backend.
    /// Env: `QUESTWALK_BACKEND_URL`
    /// Default: `http://127.0.0.1:54321`
    pub backend_url: String,

    /// Anonymous API key sent with every RPC.
    /// Env: `QUESTWALK_API_KEY`
    /// Default: none.
    pub api_key: Option<String>,

    /// Geofence radius around a step target, in meters.
    /// Env: `QUESTWALK_ARRIVAL_THRESHOLD_M`
    /// Default: `50`
    pub arrival_threshold_m: f64,

    /// Location sampling interval while navigating.
    /// Env: `QUESTWALK_POLL_INTERVAL_SECS`
    /// Default: `5`
    pub poll_interval: Duration,

    /// Hard ceiling for each backend or route RPC.
    /// Env: `QUESTWALK_RPC_TIMEOUT_SECS`
    /// Default: `30`
    pub rpc_timeout: Duration,

    /// Timeout for a single device location fix.
    /// Env: `QUESTWALK_LOCATION_TIMEOUT_SECS`
    /// Default: `10`
    pub location_timeout: Duration,

    /// Drift from the route origin that triggers a route refresh, in meters.
    /// Env: `QUESTWALK_REROUTE_DISTANCE_M`
    /// Default: `100`
    pub reroute_distance_m: f64,

    /// Travel mode requested from the route provider.
    /// Env: `QUESTWALK_TRAVEL_MODE` (walking/cycling/driving)
    /// Default: `walking`
    pub travel_mode: TravelMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:54321".to_string(),
            api_key: None,
            arrival_threshold_m: DEFAULT_ARRIVAL_THRESHOLD_M,
            poll_interval: Duration::from_secs(LOCATION_POLL_INTERVAL_SECS),
            rpc_timeout: Duration::from_secs(RPC_TIMEOUT_SECS),
            location_timeout: Duration::from_secs(LOCATION_TIMEOUT_SECS),
            reroute_distance_m: REROUTE_DISTANCE_M,
            travel_mode: TravelMode::Walking,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("QUESTWALK_BACKEND_URL") {
            config.backend_url = url.trim_end_matches('/').to_string();
        }

        if let Some(key) = lookup("QUESTWALK_API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }

        if let Some(v) = parse_positive_f64(&lookup, "QUESTWALK_ARRIVAL_THRESHOLD_M") {
            config.arrival_threshold_m = v;
        }

        if let Some(v) = parse_secs(&lookup, "QUESTWALK_POLL_INTERVAL_SECS") {
            config.poll_interval = v;
        }

        if let Some(v) = parse_secs(&lookup, "QUESTWALK_RPC_TIMEOUT_SECS") {
            config.rpc_timeout = v;
        }

        if let Some(v) = parse_secs(&lookup, "QUESTWALK_LOCATION_TIMEOUT_SECS") {
            config.location_timeout = v;
        }

        if let Some(v) = parse_positive_f64(&lookup, "QUESTWALK_REROUTE_DISTANCE_M") {
            config.reroute_distance_m = v;
        }

        if let Some(mode) = lookup("QUESTWALK_TRAVEL_MODE") {
            match mode.parse::<TravelMode>() {
                Ok(m) => config.travel_mode = m,
                Err(e) => tracing::warn!(value = %mode, error = %e, "Invalid QUESTWALK_TRAVEL_MODE, using default"),
            }
        }

        // RUST_LOG is read by the EnvFilter in telemetry.

        config
    }
}

fn parse_positive_f64<F>(lookup: &F, key: &str) -> Option<f64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Some(v),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Some(Duration::from_secs(v)),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
