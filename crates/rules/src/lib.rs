//! # Corvid Business Rules
//!
//! Rule execution engine for mutable domain objects: validation,
//! calculation and authorization rules attached to properties and to whole
//! objects.
//!
//! ## Core Types
//!
//! - [`PropertyInfo`] / [`Property`]: property handles, untyped and typed
//! - [`BusinessObject`]: what the engine needs from a domain object
//! - [`RuleDescriptor`]: immutable rule metadata (priority, primary,
//!   affected and input properties, run modes, cache eligibility)
//! - [`Rule`] / [`AsyncRule`]: rule bodies, receiving a [`RuleContext`]
//! - [`RuleRegistry`]: per-type rule sets, sealed on first use
//! - [`RuleEngine`] / [`BusinessRules`]: per-object single-flight dispatch,
//!   cascade, caching and broken-rule tracking
//! - [`AuthorizationEngine`]: yes/no authorization over the same registry
//! - [`common`]: ready-made rules (required, lengths, ranges, patterns)
//!
//! ## Execution model
//!
//! Checks are grouped into batches. At most one batch per object runs at a
//! time; triggers arriving meanwhile are coalesced into the next batch. A
//! batch runs levels (the rules of one property, in priority order), writes
//! rule outputs back to the object, and follows affected properties and
//! changed values through an explicit work queue until nothing new is
//! produced. Revisiting a property through a write is reported as a cycle
//! instead of recursing.
//!
//! Rule failures and panics become Error results; only configuration
//! mistakes (duplicate rules, writes outside a rule's scope, locked rule
//! sets) surface as [`RuleError`]s.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
mod cache;
pub mod common;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod events;
pub mod object;
pub mod prelude;
pub mod property;
pub mod registry;
pub mod result;
pub mod rule;
pub mod store;
pub mod tracker;

pub use auth::{
    AuthorizationAction, AuthorizationContext, AuthorizationEngine, AuthorizationRule,
    AuthorizationRuleDescriptor, AuthorizationRuleEntry, Principal,
};
pub use cache::CacheStats;
pub use config::{AuthorizationConfig, EngineConfig};
pub use context::RuleContext;
pub use descriptor::{ExecutionMode, RuleDescriptor, RuleDescriptorBuilder, RuleId, RunModes};
pub use engine::{BusinessRules, CheckOutcome, RuleEngine};
pub use error::{Result, RuleError, RuleFault};
pub use events::{EventBus, RuleEvent};
pub use object::{BusinessObject, TypeKey};
pub use property::{Property, PropertyInfo};
pub use registry::{RuleRegistry, RuleSet, RuleSetBuilder};
pub use result::{RuleResult, RuleSeverity};
pub use rule::{AsyncRule, Rule, RuleBody, RuleEntry};
pub use store::PropertyBag;
pub use tracker::BrokenRulesTracker;
