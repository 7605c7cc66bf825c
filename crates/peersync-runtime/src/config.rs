//! Runtime configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use peersync_core::{SyncError, SyncResult};

/// Agent runtime configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Agent tick interval
    #[serde(with = "millis")]
    pub tick_interval: Duration,
    /// Bounded mailbox capacity per agent
    pub mailbox_capacity: usize,
    /// Upper bound of the simulated delay per delivery; zero disables it
    #[serde(with = "millis")]
    pub max_delivery_delay: Duration,
    /// Background gossip on ticks
    pub autogossip: bool,
    /// Per-tick chance of an autogossip exchange
    pub autogossip_probability: f64,
    /// Seed for every random choice agents make
    pub rng_seed: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(330),
            mailbox_capacity: 256,
            max_delivery_delay: Duration::from_millis(125),
            autogossip: false,
            autogossip_probability: 0.05,
            rng_seed: None,
        }
    }
}

impl RuntimeConfig {
    /// Config for tests: no simulated latency, fixed seed
    pub fn deterministic(seed: u64) -> Self {
        Self::default()
            .with_max_delivery_delay(Duration::ZERO)
            .with_rng_seed(seed)
    }

    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn with_max_delivery_delay(mut self, delay: Duration) -> Self {
        self.max_delivery_delay = delay;
        self
    }

    pub fn with_autogossip(mut self, probability: f64) -> Self {
        self.autogossip = true;
        self.autogossip_probability = probability;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.tick_interval.is_zero() {
            return Err(SyncError::InvalidConfig("tick_interval must be positive".into()));
        }
        if self.mailbox_capacity == 0 {
            return Err(SyncError::InvalidConfig("mailbox_capacity must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.autogossip_probability) {
            return Err(SyncError::InvalidConfig(format!(
                "autogossip_probability must be within [0, 1], got {}",
                self.autogossip_probability
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON config; missing fields take defaults
    pub fn from_json(text: &str) -> SyncResult<Self> {
        let config: RuntimeConfig =
            serde_json::from_str(text).map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Tracing subscriber settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(330));
        assert_eq!(config.autogossip_probability, 0.05);
        assert!(!config.autogossip);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_partial() {
        let config = RuntimeConfig::from_json(r#"{"tick_interval": 50, "rng_seed": 9}"#).unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert_eq!(config.rng_seed, Some(9));
        assert_eq!(config.mailbox_capacity, 256);
    }

    #[test]
    fn test_json_round_trip_shape() {
        let text = serde_json::to_string(&RuntimeConfig::deterministic(3)).unwrap();
        assert!(text.contains("\"max_delivery_delay\":0"));
        assert_eq!(RuntimeConfig::from_json(&text).unwrap(), RuntimeConfig::deterministic(3));
    }

    #[test]
    fn test_invalid_rejected() {
        assert!(RuntimeConfig::from_json(r#"{"mailbox_capacity": 0}"#).is_err());
        assert!(RuntimeConfig::default().with_autogossip(1.5).validate().is_err());
        assert!(matches!(
            RuntimeConfig::from_json("not json"),
            Err(SyncError::InvalidConfig(_))
        ));
    }
}
