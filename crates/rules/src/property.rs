//! Property handles
//!
//! A [`PropertyInfo`] identifies one member of a domain type. It is `Copy`,
//! built from `'static` strings, and compares by declaring type plus name so
//! it can key maps without allocation. [`Property<T>`] adds the value type
//! on top, letting rules read and write through a typed handle while the
//! engine itself moves [`serde_json::Value`]s around.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, RuleError};

/// Untyped handle for a property (or method) of a domain type.
#[derive(Clone, Copy)]
pub struct PropertyInfo {
    owner: &'static str,
    name: &'static str,
    friendly_name: &'static str,
}

impl PropertyInfo {
    /// Create a handle whose friendly name is the property name.
    pub const fn new(owner: &'static str, name: &'static str) -> Self {
        Self {
            owner,
            name,
            friendly_name: name,
        }
    }

    /// Set the human readable name used in rule messages.
    pub const fn with_friendly_name(mut self, friendly_name: &'static str) -> Self {
        self.friendly_name = friendly_name;
        self
    }

    /// Name of the declaring type.
    pub const fn owner(&self) -> &'static str {
        self.owner
    }

    /// Member name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Human readable name.
    pub const fn friendly_name(&self) -> &'static str {
        self.friendly_name
    }
}

impl PartialEq for PropertyInfo {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.name == other.name
    }
}

impl Eq for PropertyInfo {}

impl Hash for PropertyInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for PropertyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyInfo({}.{})", self.owner, self.name)
    }
}

impl fmt::Display for PropertyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// Typed property handle.
///
/// ```rust
/// use corvid_rules::property::Property;
///
/// const AGE: Property<i32> = Property::new("Person", "Age");
/// assert_eq!(AGE.info().name(), "Age");
/// ```
pub struct Property<T> {
    info: PropertyInfo,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Property<T> {
    /// Create a typed handle.
    pub const fn new(owner: &'static str, name: &'static str) -> Self {
        Self {
            info: PropertyInfo::new(owner, name),
            _marker: PhantomData,
        }
    }

    /// Set the human readable name used in rule messages.
    pub const fn with_friendly_name(self, friendly_name: &'static str) -> Self {
        Self {
            info: self.info.with_friendly_name(friendly_name),
            _marker: PhantomData,
        }
    }

    /// The untyped handle.
    pub const fn info(&self) -> PropertyInfo {
        self.info
    }
}

impl<T> Property<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Convert a typed value into the engine representation.
    pub fn to_value(&self, value: &T) -> Result<Value> {
        serde_json::to_value(value).map_err(|e| RuleError::ValueConversion {
            property: self.info,
            reason: e.to_string(),
        })
    }

    /// Convert an engine value back into the property type.
    pub fn from_value(&self, value: &Value) -> Result<T> {
        serde_json::from_value(value.clone()).map_err(|e| RuleError::ValueConversion {
            property: self.info,
            reason: e.to_string(),
        })
    }
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Property<T> {}

impl<T> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Property<{}>({})", std::any::type_name::<T>(), self.info)
    }
}

impl<T> From<Property<T>> for PropertyInfo {
    fn from(property: Property<T>) -> Self {
        property.info
    }
}

impl<T> From<&Property<T>> for PropertyInfo {
    fn from(property: &Property<T>) -> Self {
        property.info
    }
}

impl From<&PropertyInfo> for PropertyInfo {
    fn from(property: &PropertyInfo) -> Self {
        *property
    }
}
