//! Capability surface the engine consumes from domain objects.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;

use crate::error::Result;
use crate::property::PropertyInfo;
use crate::registry::RuleSetBuilder;

/// A mutable domain object whose properties are governed by rules.
///
/// Implementations own property storage and change tracking; the engine only
/// reads, writes and marks properties dirty through this trait. Writes go
/// through `&self`, so implementations use interior mutability (see
/// [`PropertyBag`](crate::store::PropertyBag)).
///
/// `write_property` must store the value without re-triggering rules: the
/// engine drives any cascade itself.
pub trait BusinessObject: Send + Sync + 'static {
    /// Current value of a property, `None` when it has never been set.
    fn read_property(&self, property: &PropertyInfo) -> Option<Value>;

    /// Store a value produced by a rule.
    fn write_property(&self, property: &PropertyInfo, value: Value) -> Result<()>;

    /// Record that a rule changed the property.
    fn mark_dirty(&self, _property: &PropertyInfo) {}

    /// Declare the rules of this type.
    ///
    /// Called once per process, the first time the registry touches the
    /// type.
    fn declare_rules(_rules: &mut RuleSetBuilder) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Identity of a registered domain type.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key for a concrete type.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: short_type_name(std::any::type_name::<T>()),
        }
    }

    /// Short type name, used in diagnostics.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// `my_crate::model::Person` -> `Person`; generic arguments are kept.
fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Person;
    struct Wrapper<T>(T);

    #[test]
    fn type_key_uses_short_name() {
        assert_eq!(TypeKey::of::<Person>().name(), "Person");
        assert_eq!(TypeKey::of::<Wrapper<Person>>().name().split('<').next(), Some("Wrapper"));
    }

    #[test]
    fn type_key_equality_is_by_type() {
        assert_eq!(TypeKey::of::<Person>(), TypeKey::of::<Person>());
        assert_ne!(TypeKey::of::<Person>(), TypeKey::of::<Wrapper<u8>>());
    }
}
