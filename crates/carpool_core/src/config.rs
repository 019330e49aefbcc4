use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lock::LockPolicy;

/// Default movement per tick, in distance units.
const DEFAULT_DISTANCE_PER_TICK: f64 = 10.0;

/// Simulated seconds one tick represents.
const DEFAULT_SECONDS_PER_TICK: u64 = 120;

/// Default maximum rider-destination to driver-destination distance.
const DEFAULT_DISTANCE_THRESHOLD: u32 = 5;

/// Default arrival window: 10 minutes.
const DEFAULT_TIME_THRESHOLD_MS: i64 = 10 * 60 * 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Route progression timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub distance_per_tick: f64,
    /// Used to convert remaining distance into an arrival estimate.
    pub seconds_per_tick: u64,
    /// Wall-clock period between ticks.
    pub tick_period_ms: u64,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            distance_per_tick: DEFAULT_DISTANCE_PER_TICK,
            seconds_per_tick: DEFAULT_SECONDS_PER_TICK,
            tick_period_ms: DEFAULT_SECONDS_PER_TICK * 1000,
        }
    }
}

impl RouteConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub distance_threshold: u32,
    pub time_threshold_ms: i64,
    pub retry_period_ms: u64,
    /// Re-enqueued riders get `arrival_time_ms = now` when set.
    pub refresh_arrival_on_retry: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            time_threshold_ms: DEFAULT_TIME_THRESHOLD_MS,
            retry_period_ms: 1000,
            refresh_arrival_on_retry: true,
        }
    }
}

impl MatchingConfig {
    pub fn retry_period(&self) -> Duration {
        Duration::from_millis(self.retry_period_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub lease_ms: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        let policy = LockPolicy::default();
        Self {
            lease_ms: policy.lease.as_millis() as u64,
            max_attempts: policy.max_attempts,
            backoff_ms: policy.backoff.as_millis() as u64,
        }
    }
}

impl From<LockConfig> for LockPolicy {
    fn from(config: LockConfig) -> Self {
        Self {
            lease: Duration::from_millis(config.lease_ms),
            max_attempts: config.max_attempts,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub marker_ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            marker_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl IdempotencyConfig {
    pub fn marker_ttl(&self) -> Duration {
        Duration::from_secs(self.marker_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub poll_interval_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
        }
    }
}

impl BusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Everything tunable about a dispatch instance. Missing sections and fields
/// fall back to their defaults, so a config file only lists overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub route: RouteConfig,
    pub matching: MatchingConfig,
    pub lock: LockConfig,
    pub idempotency: IdempotencyConfig,
    pub bus: BusConfig,
}

impl DispatchConfig {
    pub fn from_json_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        Self::from_json_str(&raw, &display)
    }

    pub fn lock_policy(&self) -> LockPolicy {
        self.lock.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dispatch_constants() {
        let config = DispatchConfig::default();
        assert_eq!(config.route.distance_per_tick, 10.0);
        assert_eq!(config.route.tick_period(), Duration::from_secs(120));
        assert_eq!(config.matching.distance_threshold, 5);
        assert_eq!(config.matching.time_threshold_ms, 600_000);
        assert!(config.matching.refresh_arrival_on_retry);
        assert_eq!(config.lock_policy(), LockPolicy::default());
        assert_eq!(config.idempotency.marker_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let raw = r#"{ "matching": { "distance_threshold": 8 }, "lock": { "backoff_ms": 0 } }"#;
        let config = DispatchConfig::from_json_str(raw, "inline").unwrap();
        assert_eq!(config.matching.distance_threshold, 8);
        assert_eq!(config.matching.time_threshold_ms, 600_000);
        assert_eq!(config.lock.backoff_ms, 0);
        assert_eq!(config.lock.max_attempts, 10);
        assert_eq!(config.route, RouteConfig::default());
    }

    #[test]
    fn parse_error_names_origin() {
        let error = DispatchConfig::from_json_str("{ nope", "dispatch.json").unwrap_err();
        assert!(error.to_string().starts_with("failed to parse config dispatch.json"));
    }

    #[test]
    fn reads_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.json");
        std::fs::write(&path, r#"{ "bus": { "poll_interval_ms": 5 } }"#).unwrap();

        let config = DispatchConfig::from_json_file(&path).unwrap();
        assert_eq!(config.bus.poll_interval(), Duration::from_millis(5));

        let missing = DispatchConfig::from_json_file(dir.path().join("absent.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
