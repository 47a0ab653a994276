//! Configuration for the session store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default decay constant (per second) applied to the offloadable score boost.
pub const DEFAULT_DECAY_RATE: f64 = 0.1;

/// Default number of id draws before giving up on finding a free id.
pub const DEFAULT_ID_RETRY_LIMIT: u32 = 8;

/// Default upper bound for a payload received through onload (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Configuration for the session store.
///
/// ```toml
/// node_id = "edge-eu-west-1"
/// decay_rate = 0.1
/// id_retry_limit = 8
/// max_payload_bytes = 67108864
/// sweep_interval_secs = 30
/// enable_sweeper = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Identifier of the local node, recorded as `created_in` on new sessions.
    pub node_id: String,

    /// Decay constant `k` of the offload score, per second.
    pub decay_rate: f64,

    /// How many ids are drawn before creation fails.
    pub id_retry_limit: u32,

    /// Largest payload accepted by onload.
    pub max_payload_bytes: usize,

    /// Interval between expiration sweeps, in seconds.
    #[serde(rename = "sweep_interval_secs", with = "duration_secs")]
    pub sweep_interval: Duration,

    /// Whether the background sweeper should be started by the host process.
    pub enable_sweeper: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            decay_rate: DEFAULT_DECAY_RATE,
            id_retry_limit: DEFAULT_ID_RETRY_LIMIT,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            sweep_interval: Duration::from_secs(30),
            enable_sweeper: true,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML and validate it.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values can drive a store.
    pub fn validate(&self) -> Result<()> {
        if self.id_retry_limit == 0 {
            return Err(Error::Config("id_retry_limit must be at least 1".into()));
        }
        if !self.decay_rate.is_finite() || self.decay_rate < 0.0 {
            return Err(Error::Config(format!(
                "decay_rate must be a finite non-negative number, got {}",
                self.decay_rate
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::Config("sweep_interval_secs must be positive".into()));
        }
        Ok(())
    }

    /// Set the local node identifier.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Set the decay constant of the offload score.
    pub fn with_decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = decay_rate;
        self
    }

    /// Set the id retry bound.
    pub fn with_id_retry_limit(mut self, limit: u32) -> Self {
        self.id_retry_limit = limit;
        self
    }

    /// Set the maximum accepted payload size.
    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Enable or disable the background sweeper.
    pub fn with_sweeper(mut self, enabled: bool) -> Self {
        self.enable_sweeper = enabled;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
