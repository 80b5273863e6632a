//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuleError};

/// Settings shared by every object attached to a [`RuleEngine`].
///
/// [`RuleEngine`]: crate::engine::RuleEngine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Re-check properties changed by write-back, cascading further. Default: true
    pub cascade_on_dirty_properties: bool,
    /// Once a level has an Error, skip rules with a higher priority than
    /// this. Default: none (only explicit stop-processing truncates a level)
    pub process_through_priority: Option<i32>,
    /// Longest cascade path; deeper branches are reported as cycles. Default: 32
    pub max_cascade_depth: usize,
    /// Serve cache-eligible rules from the per-object cache. Default: true
    pub cache_enabled: bool,
    /// Events buffered per subscriber. Default: 256
    pub event_capacity: usize,
    /// Settings of the engine returned by [`RuleEngine::authorization`].
    ///
    /// [`RuleEngine::authorization`]: crate::engine::RuleEngine::authorization
    pub authorization: AuthorizationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cascade_on_dirty_properties: true,
            process_through_priority: None,
            max_cascade_depth: 32,
            cache_enabled: true,
            event_capacity: 256,
            authorization: AuthorizationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate the configuration, returning an error if any field is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.max_cascade_depth == 0 {
            return Err(RuleError::Config("max_cascade_depth must be > 0".into()));
        }
        if self.event_capacity == 0 {
            return Err(RuleError::Config("event_capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Authorization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Stop at the first rule that denies. Default: true
    pub short_circuit_on_deny: bool,
    /// Cache decisions per principal. Default: true
    pub cache_enabled: bool,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            short_circuit_on_deny: true,
            cache_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_depth_is_rejected() {
        let config = EngineConfig {
            max_cascade_depth: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(RuleError::Config(_))));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = EngineConfig {
            event_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "process_through_priority": 10,
            "authorization": { "short_circuit_on_deny": false }
        }))
        .unwrap();

        assert_eq!(config.process_through_priority, Some(10));
        assert_eq!(config.max_cascade_depth, 32);
        assert!(!config.authorization.short_circuit_on_deny);
        assert!(config.authorization.cache_enabled);
    }
}
