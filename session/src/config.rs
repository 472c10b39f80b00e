use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use common::{
    DISCOVERY_SCAN_LIMIT, EMPTY_SESSION_GRACE_MS, FALLBACK_EXPECTED_VOTES, HEARTBEAT_INTERVAL_MS,
    MAX_PLAYERS, REAPER_SCAN_LIMIT, REMATCH_CLEANUP_DELAY_MS, REQUIRED_PLAYERS, STALE_SESSION_TTL_MS,
    START_LEAD_MS,
};

/// Tunables shared by every session component
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Players a session holds before joins are rejected
    pub max_players: usize,
    /// Players the host waits for before signalling the start
    pub required_players: usize,
    pub start_lead_ms: i64,
    pub discovery_scan_limit: usize,
    pub fallback_expected_votes: usize,
    pub rematch_cleanup_delay: Duration,
    pub reaper_scan_limit: usize,
    pub stale_session_ttl_ms: i64,
    pub empty_session_grace_ms: i64,
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_players: MAX_PLAYERS,
            required_players: REQUIRED_PLAYERS,
            start_lead_ms: START_LEAD_MS,
            discovery_scan_limit: DISCOVERY_SCAN_LIMIT,
            fallback_expected_votes: FALLBACK_EXPECTED_VOTES,
            rematch_cleanup_delay: Duration::from_millis(REMATCH_CLEANUP_DELAY_MS),
            reaper_scan_limit: REAPER_SCAN_LIMIT,
            stale_session_ttl_ms: STALE_SESSION_TTL_MS,
            empty_session_grace_ms: EMPTY_SESSION_GRACE_MS,
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `INKMAZE_*` variables from the environment or a `.env` file
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let ms = |d: Duration| d.as_millis() as u64;

        Ok(Self {
            max_players: parse_or(&lookup, "INKMAZE_MAX_PLAYERS", defaults.max_players)?,
            required_players: parse_or(&lookup, "INKMAZE_REQUIRED_PLAYERS", defaults.required_players)?,
            start_lead_ms: parse_or(&lookup, "INKMAZE_START_LEAD_MS", defaults.start_lead_ms)?,
            discovery_scan_limit: parse_or(&lookup, "INKMAZE_DISCOVERY_SCAN_LIMIT", defaults.discovery_scan_limit)?,
            fallback_expected_votes: parse_or(
                &lookup,
                "INKMAZE_FALLBACK_EXPECTED_VOTES",
                defaults.fallback_expected_votes,
            )?,
            rematch_cleanup_delay: Duration::from_millis(parse_or(
                &lookup,
                "INKMAZE_REMATCH_CLEANUP_DELAY_MS",
                ms(defaults.rematch_cleanup_delay),
            )?),
            reaper_scan_limit: parse_or(&lookup, "INKMAZE_REAPER_SCAN_LIMIT", defaults.reaper_scan_limit)?,
            stale_session_ttl_ms: parse_or(&lookup, "INKMAZE_STALE_SESSION_TTL_MS", defaults.stale_session_ttl_ms)?,
            empty_session_grace_ms: parse_or(
                &lookup,
                "INKMAZE_EMPTY_SESSION_GRACE_MS",
                defaults.empty_session_grace_ms,
            )?,
            heartbeat_interval: Duration::from_millis(parse_or(
                &lookup,
                "INKMAZE_HEARTBEAT_INTERVAL_MS",
                ms(defaults.heartbeat_interval),
            )?),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = SessionConfig::default();
        assert_eq!(config.start_lead_ms, 4000);
        assert_eq!(config.discovery_scan_limit, 20);
        assert_eq!(config.fallback_expected_votes, 2);
        assert_eq!(config.rematch_cleanup_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> =
            HashMap::from([("INKMAZE_START_LEAD_MS", "1500"), ("INKMAZE_REAPER_SCAN_LIMIT", " 5 ")]);
        let config = SessionConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.start_lead_ms, 1500);
        assert_eq!(config.reaper_scan_limit, 5);
        assert_eq!(config.max_players, 2);
    }

    #[test]
    fn test_invalid_override_is_reported() {
        let err = SessionConfig::from_lookup(|k| (k == "INKMAZE_MAX_PLAYERS").then(|| "two".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("INKMAZE_MAX_PLAYERS"));
    }
}
