//! Per-object rule result cache.
//!
//! Entries are keyed by rule and stamped with a hash of the rule id plus
//! the values of the rule's read-set at dispatch time. An entry is only
//! reused when the stamp and the stored snapshot both match, and it is
//! dropped as soon as any property in its read-set changes.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::context::ContextOutput;
use crate::descriptor::RuleId;
use crate::property::PropertyInfo;

struct CacheEntry {
    hash: u64,
    inputs: IndexMap<PropertyInfo, Value>,
    output: ContextOutput,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that had to run the rule.
    pub misses: u64,
    /// Live entries.
    pub entries: usize,
}

#[derive(Default)]
pub(crate) struct RuleCache {
    entries: Mutex<HashMap<RuleId, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RuleCache {
    pub fn lookup(
        &self,
        rule: &RuleId,
        hash: u64,
        inputs: &IndexMap<PropertyInfo, Value>,
    ) -> Option<ContextOutput> {
        let found = self
            .entries
            .lock()
            .get(rule)
            .filter(|e| e.hash == hash && e.inputs == *inputs)
            .map(|e| e.output.clone());
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn store(
        &self,
        rule: RuleId,
        hash: u64,
        inputs: IndexMap<PropertyInfo, Value>,
        output: ContextOutput,
    ) {
        self.entries.lock().insert(
            rule,
            CacheEntry {
                hash,
                inputs,
                output,
            },
        );
    }

    /// Drop every entry whose read-set contains `property`. Returns how many.
    pub fn invalidate(&self, property: &PropertyInfo) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.inputs.contains_key(property));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
        }
    }
}

/// Hash of a rule id and its snapshot values, in read-set order.
pub(crate) fn snapshot_hash(rule: &RuleId, inputs: &IndexMap<PropertyInfo, Value>) -> u64 {
    let mut hasher = DefaultHasher::new();
    rule.hash(&mut hasher);
    for (property, value) in inputs {
        property.hash(&mut hasher);
        hash_value(value, &mut hasher);
    }
    hasher.finish()
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            n.to_string().hash(state);
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            5u8.hash(state);
            map.len().hash(state);
            for (k, v) in map {
                k.hash(state);
                hash_value(v, state);
            }
        }
    }
}
