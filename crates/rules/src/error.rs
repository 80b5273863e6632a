//! Error types for rule registration and dispatch
use std::fmt;

use thiserror::Error;

use crate::descriptor::RuleId;
use crate::property::PropertyInfo;

/// Result type for rule engine operations
pub type Result<T> = std::result::Result<T, RuleError>;

/// Boxed error carried as the cause of a failed rule.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Configuration and engine errors.
///
/// These are surfaced to the caller immediately and are never retried.
/// Faults raised by well-behaved rule bodies never show up here; they are
/// converted into Error-severity results instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RuleError {
    /// The same rule URI was registered twice for one type
    #[error("Rule '{rule}' is already registered for type '{type_name}'")]
    DuplicateRule {
        /// The declaring type
        type_name: &'static str,
        /// The duplicated rule
        rule: RuleId,
    },

    /// Rules for the type are sealed and can no longer change
    #[error("Rules for type '{type_name}' are locked: {reason}")]
    Locked {
        /// The declaring type
        type_name: &'static str,
        /// What was attempted
        reason: String,
    },

    /// A rule wrote an output, result or dirty mark outside its declared scope
    #[error("Rule '{rule}' referenced property '{property}' outside its declared scope")]
    OutOfScope {
        /// The offending rule
        rule: RuleId,
        /// The property outside primary ∪ affected
        property: PropertyInfo,
    },

    /// A rule read a property that is not part of its input snapshot
    #[error("Rule '{rule}' read undeclared input '{property}'")]
    UndeclaredInput {
        /// The offending rule
        rule: RuleId,
        /// The property missing from the read-set
        property: PropertyInfo,
    },

    /// A primary-property shortcut was used on an object-level rule
    #[error("Rule '{rule}' has no primary property")]
    NoPrimaryProperty {
        /// The object-level rule
        rule: RuleId,
    },

    /// An input value could not be converted to the requested type
    #[error("Property '{property}' could not be converted: {reason}")]
    ValueConversion {
        /// The property being converted
        property: PropertyInfo,
        /// Conversion failure detail
        reason: String,
    },

    /// Chained rule invocation re-entered a rule already on the call stack
    #[error("Chained rule cycle: {}", format_chain(.stack, .rule))]
    ChainCycle {
        /// Rule that was about to run again
        rule: RuleId,
        /// Rules currently executing, outermost first
        stack: Vec<RuleId>,
    },

    /// Only synchronous rules can be chained from inside a rule body
    #[error("Rule '{rule}' is asynchronous and cannot be chained")]
    AsyncChain {
        /// The asynchronous inner rule
        rule: RuleId,
    },

    /// Authorization delegation re-entered a permission already being evaluated
    #[error("Authorization cycle on '{type_name}': {action} {element}")]
    AuthorizationCycle {
        /// The declaring type
        type_name: &'static str,
        /// The re-entered action
        action: String,
        /// The re-entered member, or `(type)`
        element: String,
    },

    /// The target object was dropped while rules were pending
    #[error("Target object of type '{type_name}' no longer exists")]
    TargetDropped {
        /// The declaring type
        type_name: &'static str,
    },

    /// The target object rejected a write-back
    #[error("Write to '{property}' rejected: {reason}")]
    PropertyWrite {
        /// The property being written
        property: PropertyInfo,
        /// The rejection reason
        reason: String,
    },

    /// Engine configuration is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The dispatcher task stopped before reporting an outcome
    #[error("Rule dispatcher stopped unexpectedly")]
    DispatcherGone,
}

impl RuleError {
    /// Returns `true` for errors that abort only the offending branch.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::ChainCycle { .. })
    }
}

fn format_chain(stack: &[RuleId], rule: &RuleId) -> String {
    let mut out = String::new();
    for id in stack {
        out.push_str(id.as_str());
        out.push_str(" -> ");
    }
    out.push_str(rule.as_str());
    out
}

/// Outcome of a rule body that did not complete normally.
#[derive(Error)]
#[non_exhaustive]
pub enum RuleFault {
    /// The rule failed unexpectedly; recorded as an Error result
    #[error("{message}")]
    Failed {
        /// Human readable failure
        message: String,
        /// Underlying cause, preserved for diagnostics
        #[source]
        source: Option<BoxError>,
    },

    /// The rule observed cancellation and produced nothing
    #[error("cancelled")]
    Cancelled,

    /// A chained rule cycle; aborts this rule only
    #[error(transparent)]
    Cycle(RuleError),

    /// A configuration error; aborts the batch
    #[error(transparent)]
    Config(RuleError),
}

impl RuleFault {
    /// Create a failure with only a message.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an arbitrary error as the cause of a failure.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl From<RuleError> for RuleFault {
    fn from(error: RuleError) -> Self {
        match error {
            RuleError::ChainCycle { .. } => Self::Cycle(error),
            // Bad data is an execution fault, not a wiring mistake.
            RuleError::ValueConversion { .. } => Self::from_error(error),
            _ => Self::Config(error),
        }
    }
}

impl fmt::Debug for RuleFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { message, source } => f
                .debug_struct("Failed")
                .field("message", message)
                .field("has_source", &source.is_some())
                .finish(),
            Self::Cancelled => f.write_str("Cancelled"),
            Self::Cycle(e) => f.debug_tuple("Cycle").field(e).finish(),
            Self::Config(e) => f.debug_tuple("Config").field(e).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: PropertyInfo = PropertyInfo::new("Person", "Name");

    #[test]
    fn chain_cycle_routes_to_cycle_fault() {
        let err = RuleError::ChainCycle {
            rule: RuleId::new("a", None),
            stack: vec![RuleId::new("a", None), RuleId::new("b", None)],
        };
        assert!(matches!(RuleFault::from(err), RuleFault::Cycle(_)));
    }

    #[test]
    fn other_errors_route_to_config_fault() {
        let err = RuleError::OutOfScope {
            rule: RuleId::new("a", Some(&NAME)),
            property: NAME,
        };
        assert!(matches!(RuleFault::from(err), RuleFault::Config(_)));
    }

    #[test]
    fn chain_cycle_message_lists_stack() {
        let err = RuleError::ChainCycle {
            rule: RuleId::new("a", None),
            stack: vec![RuleId::new("a", None), RuleId::new("b", None)],
        };
        let msg = err.to_string();
        assert!(msg.contains("rule://a/(object) -> rule://b/(object) -> rule://a/(object)"));
    }

    #[test]
    fn conversion_errors_route_to_failure() {
        let err = RuleError::ValueConversion {
            property: NAME,
            reason: "invalid type: null".into(),
        };
        assert!(matches!(RuleFault::from(err), RuleFault::Failed { .. }));
    }

    #[test]
    fn failure_keeps_source() {
        let io = std::io::Error::other("disk gone");
        let fault = RuleFault::from_error(io);
        match fault {
            RuleFault::Failed { message, source } => {
                assert_eq!(message, "disk gone");
                assert!(source.is_some());
            }
            other => panic!("unexpected fault: {other:?}"),
        }
    }
}
