//! Convenience re-exports for rule authors.
//!
//! ```rust
//! use corvid_rules::prelude::*;
//! ```

pub use crate::auth::{
    AuthorizationAction, AuthorizationContext, AuthorizationEngine, AuthorizationRule,
    AuthorizationRuleDescriptor, AuthorizationRuleEntry, IsInRole, IsNotInRole, Principal,
};
pub use crate::common;
pub use crate::config::{AuthorizationConfig, EngineConfig};
pub use crate::context::RuleContext;
pub use crate::descriptor::{ExecutionMode, RuleDescriptor, RuleId, RunModes};
pub use crate::engine::{BusinessRules, CheckOutcome, RuleEngine};
pub use crate::error::{RuleError, RuleFault};
pub use crate::events::RuleEvent;
pub use crate::object::BusinessObject;
pub use crate::property::{Property, PropertyInfo};
pub use crate::registry::{RuleRegistry, RuleSetBuilder};
pub use crate::result::{RuleResult, RuleSeverity};
pub use crate::rule::{AsyncRule, Rule, RuleEntry};
pub use crate::store::PropertyBag;
