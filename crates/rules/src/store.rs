//! Embeddable property storage for domain objects.

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::property::{Property, PropertyInfo};

/// Thread-safe property values plus a dirty set.
///
/// Domain objects embed a bag and forward the [`BusinessObject`]
/// read/write/mark-dirty calls to it.
///
/// [`BusinessObject`]: crate::object::BusinessObject
#[derive(Debug, Default)]
pub struct PropertyBag {
    values: RwLock<IndexMap<PropertyInfo, Value>>,
    dirty: RwLock<IndexSet<PropertyInfo>>,
}

impl PropertyBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed read; `None` when unset or not convertible.
    pub fn get<T>(&self, property: &Property<T>) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let values = self.values.read();
        values
            .get(&property.info())
            .and_then(|v| property.from_value(v).ok())
    }

    /// Typed write. Marks the property dirty.
    pub fn set<T>(&self, property: &Property<T>, value: T) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let value = property.to_value(&value)?;
        self.store(&property.info(), value);
        Ok(())
    }

    /// Raw read.
    pub fn read(&self, property: &PropertyInfo) -> Option<Value> {
        self.values.read().get(property).cloned()
    }

    /// Raw write. Marks the property dirty.
    pub fn store(&self, property: &PropertyInfo, value: Value) {
        self.values.write().insert(*property, value);
        self.mark_dirty(property);
    }

    /// Record a property as changed.
    pub fn mark_dirty(&self, property: &PropertyInfo) {
        self.dirty.write().insert(*property);
    }

    /// Whether the property changed since the last [`mark_clean`](Self::mark_clean).
    pub fn is_dirty(&self, property: &PropertyInfo) -> bool {
        self.dirty.read().contains(property)
    }

    /// Properties changed since the last [`mark_clean`](Self::mark_clean), in change order.
    pub fn dirty_properties(&self) -> Vec<PropertyInfo> {
        self.dirty.read().iter().copied().collect()
    }

    /// Forget all dirty marks.
    pub fn mark_clean(&self) {
        self.dirty.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: Property<String> = Property::new("Person", "Name");
    const AGE: Property<i32> = Property::new("Person", "Age");

    #[test]
    fn typed_round_trip_marks_dirty() {
        let bag = PropertyBag::new();
        assert_eq!(bag.get(&AGE), None);

        bag.set(&AGE, 30).unwrap();
        bag.set(&NAME, "Ada".to_string()).unwrap();

        assert_eq!(bag.get(&AGE), Some(30));
        assert_eq!(bag.get(&NAME).as_deref(), Some("Ada"));
        assert_eq!(bag.dirty_properties(), vec![AGE.info(), NAME.info()]);
    }

    #[test]
    fn mark_clean_resets_dirty_set() {
        let bag = PropertyBag::new();
        bag.set(&AGE, 1).unwrap();
        bag.mark_clean();
        assert!(!bag.is_dirty(&AGE.info()));
        assert_eq!(bag.get(&AGE), Some(1));
    }
}
