//! Configuration surface.
//!
//! Everything tunable (limiter rules, TTLs, sweep intervals, poll timing)
//! deserializes from one YAML document. Every field has a production default,
//! so an empty document is a valid configuration.

use crate::idempotency::ManagerConfig;
use crate::ratelimit::RateLimitRules;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Limiter rules plus sweep cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub rules: RateLimitRules,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rules: RateLimitRules::default(),
            sweep_interval_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// FSM state lifetime and locking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub lock_ttl_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 300,
            lock_ttl_secs: 5,
        }
    }
}

impl StateConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

/// Idempotent execution timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencySettings {
    pub record_ttl_secs: u64,
    pub lock_ttl_secs: u64,
    pub poll_interval_ms: u64,
    pub max_wait_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            record_ttl_secs: 86_400,
            lock_ttl_secs: 300,
            poll_interval_ms: 100,
            max_wait_secs: 30,
            sweep_interval_secs: 3600,
        }
    }
}

impl IdempotencySettings {
    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }
}

/// Root configuration for the coordination core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub rate_limits: RateLimitConfig,
    pub state: StateConfig,
    pub idempotency: IdempotencySettings,
}

impl CoordinationConfig {
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml::from_str(source)
            .map_err(|err| Error::configuration(format!("invalid configuration: {err}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            Error::configuration(format!(
                "cannot read {}: {err}",
                path.as_ref().display()
            ))
        })?;
        Self::from_yaml(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RateRule;

    #[test]
    fn empty_document_yields_defaults() {
        let config = CoordinationConfig::from_yaml("{}").unwrap();
        assert_eq!(config, CoordinationConfig::default());
        assert_eq!(config.state.ttl(), Duration::from_secs(3600));
        assert_eq!(config.state.sweep_interval(), Duration::from_secs(300));
        assert_eq!(
            config.idempotency.manager_config().poll_interval,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn yaml_overrides_merge_with_defaults() {
        let source = r#"
rate_limits:
  rules:
    per_entity: { limit: 5, window_secs: 10 }
    commands:
      buy: { limit: 2, window_secs: 60 }
    allow_list: [1001]
state:
  ttl_secs: 600
"#;
        let config = CoordinationConfig::from_yaml(source).unwrap();

        assert_eq!(
            config.rate_limits.rules.per_entity,
            RateRule::new(5, Duration::from_secs(10))
        );
        assert_eq!(
            config.rate_limits.rules.commands.get("buy"),
            Some(&RateRule::new(2, Duration::from_secs(60)))
        );
        assert_eq!(config.rate_limits.rules.allow_list, vec![1001]);
        assert_eq!(config.state.ttl_secs, 600);
        // Untouched sections keep their defaults.
        assert_eq!(config.idempotency, IdempotencySettings::default());
    }

    #[test]
    fn malformed_yaml_is_a_configuration_error() {
        let err = CoordinationConfig::from_yaml("state: [not, a, map]").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
