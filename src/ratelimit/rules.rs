//! Limit policy resolution.

use super::{Limiter, RateDecision};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// One limit/window tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRule {
    pub limit: u32,
    pub window_secs: u64,
}

impl RateRule {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window_secs: window.as_secs(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Configured limits: a global ceiling, a per-entity ceiling, per-command
/// tuples, and an allow-list of entity ids that bypass limiting entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitRules {
    pub global: RateRule,
    pub per_entity: RateRule,
    #[serde(default)]
    pub commands: HashMap<String, RateRule>,
    #[serde(default)]
    pub allow_list: Vec<i64>,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self {
            global: RateRule {
                limit: 1000,
                window_secs: 60,
            },
            per_entity: RateRule {
                limit: 20,
                window_secs: 60,
            },
            commands: HashMap::new(),
            allow_list: Vec::new(),
        }
    }
}

/// Resolves which rule applies to a request and runs it through the limiter.
/// The allow-list is consulted before any limiter call, so operator traffic
/// never touches the store.
pub struct RatePolicy {
    rules: RateLimitRules,
    limiter: Arc<dyn Limiter>,
}

impl RatePolicy {
    pub fn new(rules: RateLimitRules, limiter: Arc<dyn Limiter>) -> Self {
        Self { rules, limiter }
    }

    pub fn is_allow_listed(&self, entity_id: i64) -> bool {
        self.rules.allow_list.contains(&entity_id)
    }

    /// Per-command check for one entity. Unknown commands are a configuration
    /// error, not a silent pass.
    pub async fn check_command(&self, entity_id: i64, command: &str) -> Result<RateDecision> {
        if self.is_allow_listed(entity_id) {
            return Ok(bypass());
        }
        let rule = self.rules.commands.get(command).ok_or_else(|| {
            Error::configuration(format!("no rate limit configured for command {command:?}"))
        })?;
        self.limiter
            .check(&format!("cmd:{command}:{entity_id}"), rule.limit, rule.window())
            .await
    }

    /// Per-entity check across all commands.
    pub async fn check_entity(&self, entity_id: i64) -> Result<RateDecision> {
        if self.is_allow_listed(entity_id) {
            return Ok(bypass());
        }
        let rule = &self.rules.per_entity;
        self.limiter
            .check(&format!("entity:{entity_id}"), rule.limit, rule.window())
            .await
    }

    /// Cluster-wide ceiling shared by all entities.
    pub async fn check_global(&self) -> Result<RateDecision> {
        let rule = &self.rules.global;
        self.limiter.check("global", rule.limit, rule.window()).await
    }
}

fn bypass() -> RateDecision {
    RateDecision {
        allowed: true,
        remaining: u32::MAX,
        reset_at: SystemTime::now(),
    }
}
