//! Outcome of a single rule invocation.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::descriptor::RuleId;
use crate::property::PropertyInfo;

/// Severity of a rule result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleSeverity {
    /// Makes the object (and property) invalid.
    Error,
    /// Reported but does not affect validity.
    Warning,
    /// Informational message.
    Information,
    /// The rule passed; never stored as a broken rule.
    Success,
}

impl fmt::Display for RuleSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Information => write!(f, "information"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// Immutable result produced by a rule.
///
/// Results are built with the constructor for their severity and the
/// `with_*` / [`stop_processing`](Self::stop_processing) modifiers, then
/// handed to the [`RuleContext`](crate::context::RuleContext), which stamps
/// the producing rule and default property.
#[derive(Clone)]
pub struct RuleResult {
    pub(crate) rule: Option<RuleId>,
    pub(crate) property: Option<PropertyInfo>,
    severity: RuleSeverity,
    message: Cow<'static, str>,
    stop_processing: bool,
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl RuleResult {
    fn with_severity(severity: RuleSeverity, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            rule: None,
            property: None,
            severity,
            message: message.into(),
            stop_processing: false,
            cause: None,
        }
    }

    /// Error result.
    pub fn error(message: impl Into<Cow<'static, str>>) -> Self {
        Self::with_severity(RuleSeverity::Error, message)
    }

    /// Warning result.
    pub fn warning(message: impl Into<Cow<'static, str>>) -> Self {
        Self::with_severity(RuleSeverity::Warning, message)
    }

    /// Information result.
    pub fn information(message: impl Into<Cow<'static, str>>) -> Self {
        Self::with_severity(RuleSeverity::Information, message)
    }

    /// Success result.
    pub fn success() -> Self {
        Self::with_severity(RuleSeverity::Success, "")
    }

    /// Attribute the result to a property instead of the rule's primary property.
    pub fn with_property(mut self, property: impl Into<PropertyInfo>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// No further rules run at the current level.
    pub fn stop_processing(mut self) -> Self {
        self.stop_processing = true;
        self
    }

    /// Attach the underlying fault.
    pub fn with_cause(mut self, cause: Arc<dyn std::error::Error + Send + Sync>) -> Self {
        self.cause = Some(cause);
        self
    }

    pub(crate) fn with_rule(mut self, rule: RuleId) -> Self {
        self.rule = Some(rule);
        self
    }

    /// The rule that produced the result.
    ///
    /// Always set once the result has passed through a rule context.
    pub fn rule(&self) -> Option<&RuleId> {
        self.rule.as_ref()
    }

    /// Target property, `None` for object-level results.
    pub fn property(&self) -> Option<PropertyInfo> {
        self.property
    }

    /// Severity.
    pub fn severity(&self) -> RuleSeverity {
        self.severity
    }

    /// Message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the result halts the current level.
    pub fn is_stop_processing(&self) -> bool {
        self.stop_processing
    }

    /// Underlying fault, when the result came from a failed rule.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// `true` for Error severity.
    pub fn is_error(&self) -> bool {
        self.severity == RuleSeverity::Error
    }

    /// `true` for Error, Warning and Information severities.
    pub fn is_broken(&self) -> bool {
        self.severity != RuleSeverity::Success
    }
}

impl PartialEq for RuleResult {
    fn eq(&self, other: &Self) -> bool {
        self.rule == other.rule
            && self.property == other.property
            && self.severity == other.severity
            && self.message == other.message
            && self.stop_processing == other.stop_processing
    }
}

impl fmt::Debug for RuleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleResult")
            .field("rule", &self.rule)
            .field("property", &self.property)
            .field("severity", &self.severity)
            .field("message", &self.message)
            .field("stop_processing", &self.stop_processing)
            .field("has_cause", &self.cause.is_some())
            .finish()
    }
}
