//! Environment-driven configuration
//!
//! Every knob has a default and an environment override. Configuration is
//! loaded once at startup and validated before any task is spawned; an
//! invalid value is fatal.

use grapevine_health::{BreakerConfig, ScoreWeights};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// DHT overlay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrapeConfig {
    pub dht_port: u16,
    pub api_port: u16,
    pub bootstrap: Vec<String>,
    pub concurrency: u32,
}

/// Worker-side settings: what to announce and how often
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub service_name: String,
    pub port: u16,
    pub announce_interval_ms: u64,
}

/// Client-side settings. The three explicit weights leave the latency
/// weight implicit: 1 − (error + timeout + freshness).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub request_timeout_ms: u64,
    pub error_weight: f64,
    pub timeout_weight: f64,
    pub freshness_weight: f64,
}

/// Weights for the stored aggregate score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub latency_weight: f64,
    pub error_weight: f64,
    pub timeout_weight: f64,
    pub freshness_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub half_open_max_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    pub hint_ttl_ms: u64,
    pub publish_interval_ms: u64,
    pub decay_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub grape: GrapeConfig,
    pub worker: WorkerConfig,
    pub client: ClientConfig,
    pub metrics: MetricsConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub gossip: GossipConfig,
}

fn parse_int<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

fn parse_float(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> Result<f64> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

/// Comma-separated list; empty entries are dropped
fn parse_list(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Vec<String> {
    match lookup(key) {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}

fn parse_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup (tests pass a map)
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            grape: GrapeConfig {
                dht_port: parse_int(lookup, "GRAPE_DHT_PORT", 20001)?,
                api_port: parse_int(lookup, "GRAPE_API_PORT", 30001)?,
                bootstrap: parse_list(lookup, "GRAPE_BOOTSTRAP"),
                concurrency: parse_int(lookup, "GRAPE_CONCURRENCY", 32)?,
            },
            worker: WorkerConfig {
                service_name: parse_string(lookup, "WORKER_SERVICE_NAME", "job_service"),
                port: parse_int(lookup, "WORKER_PORT", 1337)?,
                announce_interval_ms: parse_int(lookup, "WORKER_ANNOUNCE_INTERVAL", 5000)?,
            },
            client: ClientConfig {
                request_timeout_ms: parse_int(lookup, "CLIENT_REQUEST_TIMEOUT", 5000)?,
                error_weight: parse_float(lookup, "CLIENT_ERROR_WEIGHT", 0.3)?,
                timeout_weight: parse_float(lookup, "CLIENT_TIMEOUT_WEIGHT", 0.2)?,
                freshness_weight: parse_float(lookup, "CLIENT_FRESHNESS_WEIGHT", 0.1)?,
            },
            metrics: MetricsConfig {
                latency_weight: parse_float(lookup, "METRICS_LATENCY_WEIGHT", 0.4)?,
                error_weight: parse_float(lookup, "METRICS_ERROR_WEIGHT", 0.3)?,
                timeout_weight: parse_float(lookup, "METRICS_TIMEOUT_WEIGHT", 0.2)?,
                freshness_weight: parse_float(lookup, "METRICS_FRESHNESS_WEIGHT", 0.1)?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parse_int(lookup, "CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
                cooldown_ms: parse_int(lookup, "CIRCUIT_BREAKER_COOLDOWN_MS", 10000)?,
                half_open_max_requests: parse_int(
                    lookup,
                    "CIRCUIT_BREAKER_HALF_OPEN_MAX_REQUESTS",
                    1,
                )?,
            },
            gossip: GossipConfig {
                hint_ttl_ms: parse_int(lookup, "GOSSIP_HINT_TTL", 60000)?,
                publish_interval_ms: parse_int(lookup, "GOSSIP_PUBLISH_INTERVAL", 5000)?,
                decay_factor: parse_float(lookup, "GOSSIP_DECAY_FACTOR", 0.5)?,
            },
        })
    }

    /// Reject any configuration the running system could not honor
    pub fn validate(&self) -> Result<()> {
        let metrics = self.metrics_weights();
        if !metrics.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "metrics weights must sum to 1.0, got {}",
                metrics.latency + metrics.error + metrics.timeout + metrics.freshness
            )));
        }

        let client = self.client_weights();
        if client.latency < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "client error/timeout/freshness weights exceed 1.0 (implicit latency weight {})",
                client.latency
            )));
        }

        if self.grape.dht_port == 0 || self.grape.api_port == 0 || self.worker.port == 0 {
            return Err(ConfigError::Invalid("ports must be positive".to_string()));
        }
        if self.grape.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "grape concurrency must be positive".to_string(),
            ));
        }
        if self.worker.service_name.is_empty() {
            return Err(ConfigError::Invalid(
                "worker service name must not be empty".to_string(),
            ));
        }
        if self.worker.announce_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "worker announce interval must be positive".to_string(),
            ));
        }
        if self.client.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "client request timeout must be positive".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit breaker failure threshold must be positive".to_string(),
            ));
        }
        if self.circuit_breaker.cooldown_ms == 0 {
            return Err(ConfigError::Invalid(
                "circuit breaker cooldown must be positive".to_string(),
            ));
        }
        if self.circuit_breaker.half_open_max_requests == 0 {
            return Err(ConfigError::Invalid(
                "circuit breaker half-open request limit must be positive".to_string(),
            ));
        }
        if self.gossip.hint_ttl_ms == 0 || self.gossip.publish_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "gossip intervals must be positive".to_string(),
            ));
        }
        if !(self.gossip.decay_factor > 0.0 && self.gossip.decay_factor <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "gossip decay factor must be in (0, 1], got {}",
                self.gossip.decay_factor
            )));
        }

        Ok(())
    }

    /// Weights for the stored aggregate score
    pub fn metrics_weights(&self) -> ScoreWeights {
        ScoreWeights {
            latency: self.metrics.latency_weight,
            error: self.metrics.error_weight,
            timeout: self.metrics.timeout_weight,
            freshness: self.metrics.freshness_weight,
        }
    }

    /// Request-time weights: latency takes whatever the explicit client
    /// weights leave over
    pub fn client_weights(&self) -> ScoreWeights {
        ScoreWeights {
            latency: 1.0
                - (self.client.error_weight
                    + self.client.timeout_weight
                    + self.client.freshness_weight),
            error: self.client.error_weight,
            timeout: self.client.timeout_weight,
            freshness: self.client.freshness_weight,
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.circuit_breaker.failure_threshold,
            cooldown: Duration::from_millis(self.circuit_breaker.cooldown_ms),
            half_open_max_requests: self.circuit_breaker.half_open_max_requests,
        }
    }

    pub fn worker_endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.worker.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        // Infallible: no lookups, every field takes its default
        match Self::from_lookup(&|_| None) {
            Ok(config) => config,
            Err(_) => unreachable!("defaults always parse"),
        }
    }
}
