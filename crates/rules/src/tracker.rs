//! Broken-rule bookkeeping for one object.

use std::fmt;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::descriptor::RuleId;
use crate::property::PropertyInfo;
use crate::result::{RuleResult, RuleSeverity};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    /// Registered rule that was dispatched.
    owner: RuleId,
    /// Rule that produced the result; differs from `owner` for chained rules.
    producer: RuleId,
    property: Option<PropertyInfo>,
}

/// Staged tracker changes for one level, applied atomically by
/// [`BrokenRulesTracker::commit`].
#[derive(Debug, Default)]
pub(crate) struct LevelUpdate {
    changes: Vec<(RuleId, Vec<RuleResult>)>,
}

impl LevelUpdate {
    /// The rule ran: its entries become `results`.
    pub fn replace(&mut self, owner: RuleId, results: Vec<RuleResult>) {
        self.changes.push((owner, results));
    }

    /// The rule was skipped: drop its entries.
    pub fn clear(&mut self, owner: RuleId) {
        self.changes.push((owner, Vec::new()));
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Latest non-success results per (rule, property).
///
/// Only the engine mutates the tracker, one level at a time; readers never
/// observe a half-applied level.
#[derive(Default)]
pub struct BrokenRulesTracker {
    entries: RwLock<IndexMap<EntryKey, RuleResult>>,
}

impl BrokenRulesTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn commit(&self, update: LevelUpdate) {
        if update.is_empty() {
            return;
        }
        let mut entries = self.entries.write();
        for (owner, results) in update.changes {
            entries.retain(|key, _| key.owner != owner);
            for result in results.into_iter().filter(RuleResult::is_broken) {
                let key = EntryKey {
                    producer: result.rule().cloned().unwrap_or_else(|| owner.clone()),
                    owner: owner.clone(),
                    property: result.property(),
                };
                entries.insert(key, result);
            }
        }
    }

    /// `true` when no Error-severity entry exists.
    pub fn is_valid(&self) -> bool {
        !self.entries.read().values().any(RuleResult::is_error)
    }

    /// `true` when no Error-severity entry exists for `property`.
    pub fn is_property_valid(&self, property: &PropertyInfo) -> bool {
        !self
            .entries
            .read()
            .values()
            .any(|r| r.is_error() && r.property().as_ref() == Some(property))
    }

    /// Every broken rule in commit order.
    pub fn broken_rules(&self) -> Vec<RuleResult> {
        self.entries.read().values().cloned().collect()
    }

    /// Broken rules attributed to `property`.
    pub fn broken_rules_for(&self, property: &PropertyInfo) -> Vec<RuleResult> {
        self.entries
            .read()
            .values()
            .filter(|r| r.property().as_ref() == Some(property))
            .cloned()
            .collect()
    }

    /// Broken rules attributed to the object itself.
    pub fn object_broken_rules(&self) -> Vec<RuleResult> {
        self.entries
            .read()
            .values()
            .filter(|r| r.property().is_none())
            .cloned()
            .collect()
    }

    /// First Error for `property`.
    pub fn first_error_for(&self, property: &PropertyInfo) -> Option<RuleResult> {
        self.entries
            .read()
            .values()
            .find(|r| r.is_error() && r.property().as_ref() == Some(property))
            .cloned()
    }

    /// Number of Error entries.
    pub fn error_count(&self) -> usize {
        self.count(RuleSeverity::Error)
    }

    /// Number of Warning entries.
    pub fn warning_count(&self) -> usize {
        self.count(RuleSeverity::Warning)
    }

    /// Number of Information entries.
    pub fn information_count(&self) -> usize {
        self.count(RuleSeverity::Information)
    }

    fn count(&self, severity: RuleSeverity) -> usize {
        self.entries
            .read()
            .values()
            .filter(|r| r.severity() == severity)
            .count()
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is broken.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl fmt::Debug for BrokenRulesTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokenRulesTracker")
            .field("errors", &self.error_count())
            .field("warnings", &self.warning_count())
            .field("information", &self.information_count())
            .finish()
    }
}
