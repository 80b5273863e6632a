//! Process-wide, per-type rule registry.
//!
//! A type's rules are collected in a [`RuleSetBuilder`] (first from
//! [`BusinessObject::declare_rules`], then from explicit
//! [`RuleRegistry::register`] calls) and sealed into an immutable
//! [`RuleSet`] the first time the type is resolved. After sealing the set is
//! shared read-only by every instance; registering more rules fails with
//! [`RuleError::Locked`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use indexmap::IndexSet;
use tracing::debug;

use crate::auth::{AuthorizationAction, AuthorizationRuleEntry};
use crate::descriptor::ExecutionMode;
use crate::error::{Result, RuleError};
use crate::object::{BusinessObject, TypeKey};
use crate::property::PropertyInfo;
use crate::rule::RuleEntry;

/// Mutable collection of one type's rules, prior to sealing.
pub struct RuleSetBuilder {
    type_key: TypeKey,
    rules: Vec<RuleEntry>,
    authorization: Vec<AuthorizationRuleEntry>,
}

impl RuleSetBuilder {
    /// Empty builder for `type_key`.
    pub fn new(type_key: TypeKey) -> Self {
        Self {
            type_key,
            rules: Vec::new(),
            authorization: Vec::new(),
        }
    }

    /// The declaring type.
    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    /// Append a business rule. The same rule URI may only be added once.
    pub fn add(&mut self, entry: RuleEntry) -> Result<&mut Self> {
        if self.rules.iter().any(|r| r.id() == entry.id()) {
            return Err(RuleError::DuplicateRule {
                type_name: self.type_key.name(),
                rule: entry.id().clone(),
            });
        }
        self.rules.push(entry);
        Ok(self)
    }

    /// Append an authorization rule. The same rule URI may only be added once.
    pub fn add_authorization(&mut self, entry: AuthorizationRuleEntry) -> Result<&mut Self> {
        entry.descriptor().validate()?;
        if self.authorization.iter().any(|r| r.id() == entry.id()) {
            return Err(RuleError::DuplicateRule {
                type_name: self.type_key.name(),
                rule: entry.id().clone(),
            });
        }
        self.authorization.push(entry);
        Ok(self)
    }

    /// Number of business rules collected so far.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if no business rules were added.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Seal into an immutable, priority-ordered set.
    pub fn build(self) -> RuleSet {
        let mut rules = self.rules;
        // stable: registration order breaks priority ties
        rules.sort_by_key(|r| r.descriptor().priority());
        let mut authorization = self.authorization;
        authorization.sort_by_key(|r| r.descriptor().priority());
        RuleSet {
            type_key: self.type_key,
            rules,
            authorization,
        }
    }
}

impl fmt::Debug for RuleSetBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSetBuilder")
            .field("type", &self.type_key)
            .field("rules", &self.rules.len())
            .field("authorization", &self.authorization.len())
            .finish()
    }
}

/// Immutable, priority-ordered rules of one type.
pub struct RuleSet {
    type_key: TypeKey,
    rules: Vec<RuleEntry>,
    authorization: Vec<AuthorizationRuleEntry>,
}

impl RuleSet {
    /// The declaring type.
    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    /// Every business rule, in execution order.
    pub fn rules(&self) -> &[RuleEntry] {
        &self.rules
    }

    /// Number of business rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if the type has no business rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules forming the level of `property` under `mode`, in execution order.
    pub fn rules_for(
        &self,
        property: PropertyInfo,
        mode: ExecutionMode,
    ) -> impl Iterator<Item = &RuleEntry> {
        self.rules
            .iter()
            .filter(move |r| r.descriptor().applies_to(&property, mode))
    }

    /// Object-level rules valid for `mode`, in execution order.
    pub fn object_rules(&self, mode: ExecutionMode) -> impl Iterator<Item = &RuleEntry> {
        self.rules
            .iter()
            .filter(move |r| r.descriptor().applies_to_object(mode))
    }

    /// Distinct primary properties, in execution order of their first rule.
    pub fn primary_properties(&self) -> IndexSet<PropertyInfo> {
        self.rules
            .iter()
            .filter_map(|r| r.descriptor().primary_property())
            .collect()
    }

    /// Primary properties of rules that read `property` without owning it.
    pub fn dependents_of(&self, property: PropertyInfo) -> IndexSet<PropertyInfo> {
        self.rules
            .iter()
            .filter(|r| r.descriptor().input_properties().contains(&property))
            .filter_map(|r| r.descriptor().primary_property())
            .filter(|p| *p != property)
            .collect()
    }

    /// Authorization rules for `action` on `element`, in priority order.
    pub fn authorization_rules(
        &self,
        action: AuthorizationAction,
        element: Option<PropertyInfo>,
    ) -> impl Iterator<Item = &AuthorizationRuleEntry> {
        self.authorization
            .iter()
            .filter(move |r| r.descriptor().matches(action, element))
    }

    /// Every authorization rule, in priority order.
    pub fn all_authorization_rules(&self) -> &[AuthorizationRuleEntry] {
        &self.authorization
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("type", &self.type_key)
            .field(
                "rules",
                &self.rules.iter().map(RuleEntry::id).collect::<Vec<_>>(),
            )
            .field("authorization", &self.authorization.len())
            .finish()
    }
}

enum TypeRules {
    Open(RuleSetBuilder),
    Sealed(Arc<RuleSet>),
}

/// Type → rule set map.
///
/// Most programs use [`RuleRegistry::global`]; tests usually build their own
/// so that sealing in one test cannot affect another.
///
/// # Example
///
/// ```rust
/// use corvid_rules::prelude::*;
/// use serde_json::Value;
///
/// const NAME: Property<String> = Property::new("Person", "Name");
///
/// struct Person;
///
/// impl BusinessObject for Person {
///     fn read_property(&self, _: &PropertyInfo) -> Option<Value> { None }
///     fn write_property(&self, _: &PropertyInfo, _: Value) -> corvid_rules::Result<()> { Ok(()) }
/// }
///
/// let registry = RuleRegistry::new();
/// registry.register::<Person>(common::required(NAME)).unwrap();
///
/// let rules = registry.resolve::<Person>().unwrap();
/// assert_eq!(rules.len(), 1);
/// assert!(registry.is_sealed::<Person>());
/// assert!(registry.register::<Person>(common::max_length(NAME, 10)).is_err());
/// ```
#[derive(Default)]
pub struct RuleRegistry {
    types: DashMap<TypeKey, TypeRules>,
}

impl RuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<RuleRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Register a business rule for `T`.
    pub fn register<T: BusinessObject>(&self, entry: RuleEntry) -> Result<()> {
        self.with_builder::<T>(|builder| builder.add(entry).map(|_| ()))
    }

    /// Register an authorization rule for `T`.
    pub fn register_authorization<T: BusinessObject>(
        &self,
        entry: AuthorizationRuleEntry,
    ) -> Result<()> {
        self.with_builder::<T>(|builder| builder.add_authorization(entry).map(|_| ()))
    }

    /// The sealed rule set of `T`, sealing it on first use.
    pub fn resolve<T: BusinessObject>(&self) -> Result<Arc<RuleSet>> {
        let mut slot = self.touch::<T>()?;
        let set = match &mut *slot {
            TypeRules::Sealed(set) => return Ok(Arc::clone(set)),
            TypeRules::Open(builder) => {
                let key = builder.type_key();
                Arc::new(std::mem::replace(builder, RuleSetBuilder::new(key)).build())
            }
        };
        debug!(
            type_name = set.type_key().name(),
            rules = set.len(),
            authorization = set.all_authorization_rules().len(),
            "rule set sealed"
        );
        *slot = TypeRules::Sealed(Arc::clone(&set));
        Ok(set)
    }

    /// Whether `T`'s rules are sealed.
    pub fn is_sealed<T: BusinessObject>(&self) -> bool {
        self.types
            .get(&TypeKey::of::<T>())
            .is_some_and(|slot| matches!(*slot, TypeRules::Sealed(_)))
    }

    /// Number of types the registry has seen.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if no type was registered or resolved.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn with_builder<T: BusinessObject>(
        &self,
        f: impl FnOnce(&mut RuleSetBuilder) -> Result<()>,
    ) -> Result<()> {
        let mut slot = self.touch::<T>()?;
        match &mut *slot {
            TypeRules::Open(builder) => f(builder),
            TypeRules::Sealed(set) => Err(RuleError::Locked {
                type_name: set.type_key().name(),
                reason: "rules cannot be registered after the rule set is in use".into(),
            }),
        }
    }

    /// Entry for `T`, running its declarations the first time.
    fn touch<T: BusinessObject>(&self) -> Result<RefMut<'_, TypeKey, TypeRules>> {
        let key = TypeKey::of::<T>();
        match self.types.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_ref()),
            Entry::Vacant(entry) => {
                let mut builder = RuleSetBuilder::new(key);
                T::declare_rules(&mut builder)?;
                debug!(type_name = key.name(), rules = builder.len(), "rules declared");
                Ok(entry.insert(TypeRules::Open(builder)))
            }
        }
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sealed = self
            .types
            .iter()
            .filter(|slot| matches!(slot.value(), TypeRules::Sealed(_)))
            .count();
        f.debug_struct("RuleRegistry")
            .field("types", &self.types.len())
            .field("sealed", &sealed)
            .finish()
    }
}
