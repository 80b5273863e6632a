//! Business rule engine.
//!
//! [`RuleEngine`] attaches domain objects to their sealed rule sets. Each
//! attached object gets a [`BusinessRules`] handle that owns its broken-rule
//! tracker, result cache, event bus and single-flight dispatcher.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use corvid_rules::prelude::*;
//! use serde_json::Value;
//!
//! const AGE: Property<i64> = Property::new("Person", "Age");
//!
//! #[derive(Default)]
//! struct Person {
//!     values: PropertyBag,
//! }
//!
//! impl BusinessObject for Person {
//!     fn read_property(&self, property: &PropertyInfo) -> Option<Value> {
//!         self.values.read(property)
//!     }
//!
//!     fn write_property(&self, property: &PropertyInfo, value: Value) -> corvid_rules::Result<()> {
//!         self.values.store(property, value);
//!         Ok(())
//!     }
//!
//!     fn declare_rules(rules: &mut RuleSetBuilder) -> corvid_rules::Result<()> {
//!         rules.add(common::min_value(AGE, 0))?;
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> corvid_rules::Result<()> {
//! let engine = RuleEngine::new(Arc::new(RuleRegistry::new()));
//! let person = Arc::new(Person::default());
//! let rules = engine.attach(&person)?;
//!
//! person.values.set(&AGE, -1)?;
//! rules.property_changed(AGE).await?;
//! assert!(!rules.is_valid());
//!
//! person.values.set(&AGE, 30)?;
//! rules.property_changed(AGE).await?;
//! assert!(rules.is_valid());
//! # Ok(())
//! # }
//! ```

mod cascade;
mod dispatch;

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use cascade::cycle_rule_id;
use dispatch::{ObjectState, Plan};

use crate::auth::AuthorizationEngine;
use crate::cache::CacheStats;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::RuleEvent;
use crate::object::{BusinessObject, TypeKey};
use crate::property::PropertyInfo;
use crate::registry::{RuleRegistry, RuleSet};
use crate::result::RuleResult;
use crate::tracker::BrokenRulesTracker;

/// What a completed check did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Sequence number of the batch that covered the check; 0 when checks
    /// are suppressed.
    pub batch: u64,
    /// Properties whose rules ran, in order.
    pub affected_properties: Vec<PropertyInfo>,
    /// The batch stopped early because its cancellation token fired.
    pub cancelled: bool,
}

/// Attaches domain objects to their rules.
#[derive(Clone)]
pub struct RuleEngine {
    registry: Arc<RuleRegistry>,
    config: Arc<EngineConfig>,
}

impl RuleEngine {
    /// Engine with default configuration.
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self {
            registry,
            config: Arc::new(EngineConfig::default()),
        }
    }

    /// Engine with explicit configuration.
    pub fn with_config(registry: Arc<RuleRegistry>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            config: Arc::new(config),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The registry rule sets are resolved from.
    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// Authorization engine over the same registry, using
    /// [`EngineConfig::authorization`].
    pub fn authorization(&self) -> AuthorizationEngine {
        AuthorizationEngine::with_config(
            Arc::clone(&self.registry),
            self.config.authorization.clone(),
        )
    }

    /// Start governing `target`. Seals the rule set of `T`.
    ///
    /// The handle keeps only a weak reference to the object, so the object
    /// may own its handle.
    pub fn attach<T: BusinessObject>(&self, target: &Arc<T>) -> Result<Arc<BusinessRules>> {
        let rules = self.registry.resolve::<T>()?;
        let type_key = TypeKey::of::<T>();
        let target: Arc<dyn BusinessObject> = Arc::clone(target) as Arc<dyn BusinessObject>;
        debug!(type_name = type_key.name(), rules = rules.len(), "object attached");
        Ok(Arc::new(BusinessRules {
            state: Arc::new(ObjectState::new(
                Arc::downgrade(&target),
                type_key,
                rules,
                Arc::clone(&self.config),
            )),
        }))
    }
}

impl fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEngine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

/// Rule state and dispatch for one object.
///
/// Checks are async: each call waits for the batch that covers it. Calls
/// made while a batch is running are coalesced into the next batch, which
/// reads the object's values as they are when it starts.
pub struct BusinessRules {
    state: Arc<ObjectState>,
}

impl BusinessRules {
    /// Run object rules and every property's rules once.
    pub async fn check_rules(&self) -> Result<CheckOutcome> {
        self.check_rules_with(CancellationToken::new()).await
    }

    /// [`check_rules`](Self::check_rules) with a cancellation token.
    pub async fn check_rules_with(&self, token: CancellationToken) -> Result<CheckOutcome> {
        self.state.submit(Plan::all(), token).await
    }

    /// Run the rules of `property` and everything that cascades from it.
    pub async fn check_property(&self, property: impl Into<PropertyInfo>) -> Result<CheckOutcome> {
        self.check_property_with(property, CancellationToken::new())
            .await
    }

    /// [`check_property`](Self::check_property) with a cancellation token.
    pub async fn check_property_with(
        &self,
        property: impl Into<PropertyInfo>,
        token: CancellationToken,
    ) -> Result<CheckOutcome> {
        let property = property.into();
        self.state.submit(Plan::property(property), token).await
    }

    /// Run the object-level rules.
    pub async fn check_object_rules(&self) -> Result<CheckOutcome> {
        self.check_object_rules_with(CancellationToken::new()).await
    }

    /// [`check_object_rules`](Self::check_object_rules) with a cancellation token.
    pub async fn check_object_rules_with(&self, token: CancellationToken) -> Result<CheckOutcome> {
        self.state.submit(Plan::object_rules(), token).await
    }

    /// Notify that `property` changed: drop cached results that read it and
    /// check it.
    pub async fn property_changed(&self, property: impl Into<PropertyInfo>) -> Result<CheckOutcome> {
        let property = property.into();
        self.state.cache.invalidate(&property);
        self.check_property(property).await
    }

    /// `true` when no Error is recorded.
    pub fn is_valid(&self) -> bool {
        self.state.tracker.is_valid()
    }

    /// `true` when no Error is recorded for `property`.
    pub fn is_property_valid(&self, property: impl Into<PropertyInfo>) -> bool {
        self.state.tracker.is_property_valid(&property.into())
    }

    /// Every broken rule.
    pub fn broken_rules(&self) -> Vec<RuleResult> {
        self.state.tracker.broken_rules()
    }

    /// Broken rules of `property`.
    pub fn broken_rules_for(&self, property: impl Into<PropertyInfo>) -> Vec<RuleResult> {
        self.state.tracker.broken_rules_for(&property.into())
    }

    /// The broken-rule tracker.
    pub fn tracker(&self) -> &BrokenRulesTracker {
        &self.state.tracker
    }

    /// Receive events for this object.
    pub fn subscribe(&self) -> broadcast::Receiver<RuleEvent> {
        self.state.events.subscribe()
    }

    /// Whether a batch is running.
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Number of batches run so far.
    pub fn batches_completed(&self) -> u64 {
        self.state.batches_completed()
    }

    /// While suppressed, every check returns immediately without running rules.
    pub fn set_suppressed(&self, suppressed: bool) {
        self.state.set_suppressed(suppressed);
    }

    /// Whether checks are suppressed.
    pub fn is_suppressed(&self) -> bool {
        self.state.is_suppressed()
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.state.cache.stats()
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) {
        self.state.cache.clear();
    }

    /// The sealed rule set.
    pub fn rule_set(&self) -> &Arc<RuleSet> {
        &self.state.rules
    }
}

impl fmt::Debug for BusinessRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusinessRules")
            .field("type", &self.state.type_key)
            .field("busy", &self.is_busy())
            .field("batches", &self.batches_completed())
            .field("tracker", &self.state.tracker)
            .finish()
    }
}
