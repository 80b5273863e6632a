//! Static rule metadata.
//!
//! A [`RuleDescriptor`] is produced once, at type registration, by a
//! [`RuleDescriptorBuilder`] and never changes afterwards. Everything the
//! engine needs to schedule a rule lives here: identity, priority, the
//! primary property, the affected and input property sets, run modes and
//! cache eligibility.
//!
//! # Read-set contract
//!
//! A cache-eligible rule must read only properties in its read-set
//! (primary property plus declared inputs). The cache hashes exactly those
//! values; a rule reading anything else may be served a stale result and the
//! engine cannot detect it.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::property::PropertyInfo;

/// Rule identity as a URI: `rule://name/Owner.Property?arg=value`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(Arc<str>);

impl RuleId {
    /// Identity for a rule `name` attached to `primary` (or the object).
    pub fn new(name: &str, primary: Option<&PropertyInfo>) -> Self {
        let target = match primary {
            Some(p) => p.to_string(),
            None => "(object)".to_string(),
        };
        Self(format!("rule://{name}/{target}").into())
    }

    /// Use a caller supplied URI verbatim.
    pub fn custom(uri: impl Into<Arc<str>>) -> Self {
        Self(uri.into())
    }

    /// Append a `key=value` argument.
    pub fn with_arg(self, key: &str, value: impl fmt::Display) -> Self {
        let sep = if self.0.contains('?') { '&' } else { '?' };
        Self(format!("{}{sep}{key}={value}", self.0).into())
    }

    /// The URI text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuleId({})", self.0)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a rule is being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// A property value changed.
    PropertyChanged,
    /// Explicit check of object-level rules.
    CheckObjectRules,
    /// Explicit check of every rule.
    CheckRules,
    /// Re-check caused by another rule's declarations or writes.
    Cascade,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PropertyChanged => write!(f, "property-changed"),
            Self::CheckObjectRules => write!(f, "check-object-rules"),
            Self::CheckRules => write!(f, "check-rules"),
            Self::Cascade => write!(f, "cascade"),
        }
    }
}

/// Execution modes a rule takes part in. Everything is allowed by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunModes {
    /// Runs during an explicit full check.
    pub check_rules: bool,
    /// Runs when reached through an affected/dependent property.
    pub as_affected_property: bool,
    /// Runs when its primary property changes.
    pub property_changed: bool,
}

impl RunModes {
    /// All modes allowed.
    pub const ALL: Self = Self {
        check_rules: true,
        as_affected_property: true,
        property_changed: true,
    };

    /// Skip during explicit full checks.
    pub const fn deny_check_rules(mut self) -> Self {
        self.check_rules = false;
        self
    }

    /// Skip when reached through another property.
    pub const fn deny_as_affected_property(mut self) -> Self {
        self.as_affected_property = false;
        self
    }

    /// Skip when the primary property changes.
    pub const fn deny_property_changed(mut self) -> Self {
        self.property_changed = false;
        self
    }
}

impl Default for RunModes {
    fn default() -> Self {
        Self::ALL
    }
}

/// Immutable metadata for one registered rule.
#[derive(Debug, Clone)]
pub struct RuleDescriptor {
    id: RuleId,
    priority: i32,
    primary: Option<PropertyInfo>,
    affected: Vec<PropertyInfo>,
    inputs: Vec<PropertyInfo>,
    cacheable: bool,
    run_modes: RunModes,
    pub(crate) is_async: bool,
}

impl RuleDescriptor {
    /// Start describing a rule called `name`.
    pub fn builder(name: impl Into<String>) -> RuleDescriptorBuilder {
        RuleDescriptorBuilder::new(name)
    }

    /// Rule identity.
    pub fn id(&self) -> &RuleId {
        &self.id
    }

    /// Lower runs first.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Primary property, `None` for object-level rules.
    pub fn primary_property(&self) -> Option<PropertyInfo> {
        self.primary
    }

    /// Properties the rule may write beyond its primary property.
    pub fn affected_properties(&self) -> &[PropertyInfo] {
        &self.affected
    }

    /// Declared inputs (the primary property is always the first input).
    pub fn input_properties(&self) -> &[PropertyInfo] {
        &self.inputs
    }

    /// Properties captured into the input snapshot and hashed for caching.
    pub fn read_set(&self) -> &[PropertyInfo] {
        &self.inputs
    }

    /// `true` when the rule has no primary property.
    pub fn is_object_level(&self) -> bool {
        self.primary.is_none()
    }

    /// `true` for rules registered with an async body.
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Whether results may be served from the per-object cache.
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Modes the rule takes part in.
    pub fn run_modes(&self) -> RunModes {
        self.run_modes
    }

    /// Primary ∪ affected: where outputs, results and dirty marks may point.
    pub fn in_scope(&self, property: &PropertyInfo) -> bool {
        self.primary.as_ref() == Some(property) || self.affected.contains(property)
    }

    /// Whether the rule belongs to the level of `property` under `mode`.
    ///
    /// A property change also runs rules that may write the property; a
    /// cascade level runs only rules whose primary property it is.
    pub fn applies_to(&self, property: &PropertyInfo, mode: ExecutionMode) -> bool {
        let is_primary = self.primary.as_ref() == Some(property);
        match mode {
            ExecutionMode::CheckRules => is_primary && self.run_modes.check_rules,
            ExecutionMode::CheckObjectRules => false,
            ExecutionMode::PropertyChanged => {
                (is_primary && self.run_modes.property_changed)
                    || (self.affected.contains(property) && self.run_modes.as_affected_property)
            }
            ExecutionMode::Cascade => is_primary && self.run_modes.as_affected_property,
        }
    }

    /// Whether an object-level rule runs under `mode`.
    pub fn applies_to_object(&self, mode: ExecutionMode) -> bool {
        if !self.is_object_level() {
            return false;
        }
        match mode {
            ExecutionMode::CheckObjectRules => true,
            ExecutionMode::CheckRules => self.run_modes.check_rules,
            ExecutionMode::PropertyChanged | ExecutionMode::Cascade => false,
        }
    }
}

/// Mutable half of the descriptor split; consumed by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct RuleDescriptorBuilder {
    name: String,
    id: Option<RuleId>,
    args: Vec<(String, String)>,
    priority: i32,
    primary: Option<PropertyInfo>,
    affected: Vec<PropertyInfo>,
    inputs: Vec<PropertyInfo>,
    cacheable: bool,
    run_modes: RunModes,
}

impl RuleDescriptorBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            args: Vec::new(),
            priority: 0,
            primary: None,
            affected: Vec::new(),
            inputs: Vec::new(),
            cacheable: false,
            run_modes: RunModes::ALL,
        }
    }

    /// Attach the rule to a primary property.
    pub fn primary(mut self, property: impl Into<PropertyInfo>) -> Self {
        self.primary = Some(property.into());
        self
    }

    /// Declare a property the rule may also write.
    pub fn affected(mut self, property: impl Into<PropertyInfo>) -> Self {
        push_unique(&mut self.affected, property.into());
        self
    }

    /// Declare an input the rule reads.
    pub fn input(mut self, property: impl Into<PropertyInfo>) -> Self {
        push_unique(&mut self.inputs, property.into());
        self
    }

    /// Lower runs first; registration order breaks ties.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Allow results to be served from the per-object cache.
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Restrict the modes the rule runs in.
    pub fn run_modes(mut self, run_modes: RunModes) -> Self {
        self.run_modes = run_modes;
        self
    }

    /// Add an argument to the rule URI.
    pub fn arg(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.args.push((key.into(), value.to_string()));
        self
    }

    /// Override the generated URI.
    pub fn id(mut self, id: RuleId) -> Self {
        self.id = Some(id);
        self
    }

    /// Freeze into an immutable descriptor.
    pub fn build(self) -> RuleDescriptor {
        let id = self.id.unwrap_or_else(|| {
            self.args
                .iter()
                .fold(RuleId::new(&self.name, self.primary.as_ref()), |id, (k, v)| {
                    id.with_arg(k, v)
                })
        });

        let mut inputs = Vec::with_capacity(self.inputs.len() + 1);
        if let Some(primary) = self.primary {
            inputs.push(primary);
        }
        for p in self.inputs {
            push_unique(&mut inputs, p);
        }

        let mut affected = self.affected;
        if let Some(primary) = self.primary {
            affected.retain(|p| *p != primary);
        }

        RuleDescriptor {
            id,
            priority: self.priority,
            primary: self.primary,
            affected,
            inputs,
            cacheable: self.cacheable,
            run_modes: self.run_modes,
            is_async: false,
        }
    }
}

fn push_unique(list: &mut Vec<PropertyInfo>, property: PropertyInfo) {
    if !list.contains(&property) {
        list.push(property);
    }
}
