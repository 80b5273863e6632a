//! Execution envelope handed to a rule body.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use smallvec::SmallVec;
use tokio_util::sync::CancellationToken;

use crate::descriptor::{ExecutionMode, RuleDescriptor, RuleId};
use crate::error::{RuleError, RuleFault};
use crate::object::BusinessObject;
use crate::property::{Property, PropertyInfo};
use crate::result::RuleResult;
use crate::rule::{RuleBody, RuleEntry};

/// Everything a rule sees and produces during one dispatch.
///
/// The input snapshot is captured before the rule runs, so async rules
/// observe consistent values even if the object changes meanwhile. Outputs
/// are buffered and written back by the engine after the rule completes;
/// nothing a rule does touches the target directly.
///
/// A context never outlives its dispatch.
pub struct RuleContext {
    entry: RuleEntry,
    target: Option<Weak<dyn BusinessObject>>,
    inputs: IndexMap<PropertyInfo, Value>,
    outputs: IndexMap<PropertyInfo, Value>,
    dirty: IndexSet<PropertyInfo>,
    results: Vec<RuleResult>,
    origin: Option<PropertyInfo>,
    mode: ExecutionMode,
    cancellation: CancellationToken,
    call_stack: SmallVec<[RuleId; 4]>,
}

/// What the engine takes back from a finished context.
#[derive(Debug, Clone, Default)]
pub(crate) struct ContextOutput {
    pub results: Vec<RuleResult>,
    pub outputs: IndexMap<PropertyInfo, Value>,
    pub dirty: IndexSet<PropertyInfo>,
}

impl RuleContext {
    /// Standalone context with no target, in [`ExecutionMode::CheckRules`].
    ///
    /// Useful for exercising a rule body directly; feed inputs with
    /// [`with_input`](Self::with_input).
    pub fn new(entry: &RuleEntry) -> Self {
        let mut call_stack = SmallVec::new();
        call_stack.push(entry.id().clone());
        Self {
            entry: entry.clone(),
            target: None,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            dirty: IndexSet::new(),
            results: Vec::new(),
            origin: entry.descriptor().primary_property(),
            mode: ExecutionMode::CheckRules,
            cancellation: CancellationToken::new(),
            call_stack,
        }
    }

    pub(crate) fn for_dispatch(
        entry: &RuleEntry,
        target: Weak<dyn BusinessObject>,
        inputs: IndexMap<PropertyInfo, Value>,
        origin: Option<PropertyInfo>,
        mode: ExecutionMode,
        cancellation: CancellationToken,
    ) -> Self {
        let mut ctx = Self::new(entry);
        ctx.target = Some(target);
        ctx.inputs = inputs;
        ctx.origin = origin;
        ctx.mode = mode;
        ctx.cancellation = cancellation;
        ctx
    }

    /// Add a snapshot value.
    pub fn with_input(mut self, property: impl Into<PropertyInfo>, value: Value) -> Self {
        self.inputs.insert(property.into(), value);
        self
    }

    /// Override the execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Metadata of the executing rule (the inner rule while chaining).
    pub fn rule(&self) -> &RuleDescriptor {
        self.entry.descriptor()
    }

    /// Identity of the executing rule.
    pub fn rule_id(&self) -> &RuleId {
        self.entry.id()
    }

    /// The target object, if it is still alive.
    pub fn target(&self) -> Option<Arc<dyn BusinessObject>> {
        self.target.as_ref().and_then(Weak::upgrade)
    }

    /// Property whose change started this dispatch.
    pub fn origin_property(&self) -> Option<PropertyInfo> {
        self.origin
    }

    /// Why the rule runs.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Reached through an affected property or a write-back.
    pub fn is_cascade(&self) -> bool {
        self.mode == ExecutionMode::Cascade
    }

    /// Started by a property change.
    pub fn is_property_changed(&self) -> bool {
        self.mode == ExecutionMode::PropertyChanged
    }

    /// Part of an explicit full check.
    pub fn is_check_rules(&self) -> bool {
        self.mode == ExecutionMode::CheckRules
    }

    /// Part of an explicit object-rule check.
    pub fn is_check_object_rules(&self) -> bool {
        self.mode == ExecutionMode::CheckObjectRules
    }

    /// Cancellation signal of the dispatch.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Shorthand for `cancellation().is_cancelled()`.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Raw snapshot value. `Null` when the property was never set.
    pub fn input_value(&self, property: &PropertyInfo) -> Result<&Value, RuleError> {
        self.inputs
            .get(property)
            .ok_or_else(|| RuleError::UndeclaredInput {
                rule: self.rule_id().clone(),
                property: *property,
            })
    }

    /// Typed snapshot value.
    pub fn input<T>(&self, property: &Property<T>) -> Result<T, RuleError>
    where
        T: Serialize + DeserializeOwned,
    {
        let value = self.input_value(&property.info())?;
        property.from_value(value)
    }

    /// Typed snapshot value; `None` when undeclared, unset or not convertible.
    pub fn try_input<T>(&self, property: &Property<T>) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
    {
        match self.inputs.get(&property.info()) {
            None | Some(Value::Null) => None,
            Some(v) => property.from_value(v).ok(),
        }
    }

    /// The full input snapshot.
    pub fn inputs(&self) -> &IndexMap<PropertyInfo, Value> {
        &self.inputs
    }

    /// Record a result. Results without a property go to the primary
    /// property (or the object for object-level rules).
    pub fn add_result(&mut self, result: RuleResult) -> Result<(), RuleError> {
        let property = match result.property {
            Some(p) => {
                self.check_scope(&p)?;
                Some(p)
            }
            None => self.rule().primary_property(),
        };
        let mut result = result.with_rule(self.rule_id().clone());
        result.property = property;
        self.results.push(result);
        Ok(())
    }

    /// Error on the primary property.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.push_default(RuleResult::error(message.into()));
    }

    /// Error on the primary property that also stops the level.
    pub fn add_error_and_stop(&mut self, message: impl Into<String>) {
        self.push_default(RuleResult::error(message.into()).stop_processing());
    }

    /// Error on a property within the rule's scope.
    pub fn add_error_for(
        &mut self,
        property: impl Into<PropertyInfo>,
        message: impl Into<String>,
    ) -> Result<(), RuleError> {
        self.add_result(RuleResult::error(message.into()).with_property(property))
    }

    /// Warning on the primary property.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.push_default(RuleResult::warning(message.into()));
    }

    /// Warning on a property within the rule's scope.
    pub fn add_warning_for(
        &mut self,
        property: impl Into<PropertyInfo>,
        message: impl Into<String>,
    ) -> Result<(), RuleError> {
        self.add_result(RuleResult::warning(message.into()).with_property(property))
    }

    /// Information on the primary property.
    pub fn add_information(&mut self, message: impl Into<String>) {
        self.push_default(RuleResult::information(message.into()));
    }

    /// Success; only meaningful together with `stop_processing`.
    pub fn add_success(&mut self, stop_processing: bool) {
        let result = if stop_processing {
            RuleResult::success().stop_processing()
        } else {
            RuleResult::success()
        };
        self.push_default(result);
    }

    fn push_default(&mut self, result: RuleResult) {
        let mut result = result.with_rule(self.rule_id().clone());
        result.property = self.rule().primary_property();
        self.results.push(result);
    }

    /// Buffer a typed value for write-back.
    pub fn add_output<T>(&mut self, property: &Property<T>, value: T) -> Result<(), RuleError>
    where
        T: Serialize + DeserializeOwned,
    {
        let value = property.to_value(&value)?;
        self.add_output_value(property.info(), value)
    }

    /// Buffer a raw value for write-back.
    pub fn add_output_value(
        &mut self,
        property: impl Into<PropertyInfo>,
        value: Value,
    ) -> Result<(), RuleError> {
        let property = property.into();
        self.check_scope(&property)?;
        self.outputs.insert(property, value);
        Ok(())
    }

    /// Buffer a value for the primary property.
    pub fn add_primary_output(&mut self, value: Value) -> Result<(), RuleError> {
        let primary = self
            .rule()
            .primary_property()
            .ok_or_else(|| RuleError::NoPrimaryProperty {
                rule: self.rule_id().clone(),
            })?;
        self.outputs.insert(primary, value);
        Ok(())
    }

    /// Mark a property as changed so it is re-checked.
    pub fn add_dirty_property(&mut self, property: impl Into<PropertyInfo>) -> Result<(), RuleError> {
        let property = property.into();
        self.check_scope(&property)?;
        self.dirty.insert(property);
        Ok(())
    }

    /// Buffered outputs.
    pub fn outputs(&self) -> &IndexMap<PropertyInfo, Value> {
        &self.outputs
    }

    /// Results recorded so far.
    pub fn results(&self) -> &[RuleResult] {
        &self.results
    }

    /// Run another synchronous rule inside this one.
    ///
    /// The inner rule shares the snapshot, output buffer and result list;
    /// only the rule identity (and so the write scope) changes for the
    /// duration of the call. Re-entering a rule already on the call stack
    /// fails with [`RuleError::ChainCycle`].
    pub fn execute_rule(&mut self, inner: &RuleEntry) -> Result<(), RuleFault> {
        if self.call_stack.contains(inner.id()) {
            return Err(RuleError::ChainCycle {
                rule: inner.id().clone(),
                stack: self.call_stack.to_vec(),
            }
            .into());
        }
        let body = match inner.body() {
            RuleBody::Sync(rule) => Arc::clone(rule),
            RuleBody::Async(_) => {
                return Err(RuleError::AsyncChain {
                    rule: inner.id().clone(),
                }
                .into());
            }
        };

        let outer = std::mem::replace(&mut self.entry, inner.clone());
        self.call_stack.push(inner.id().clone());
        let outcome = body.execute(self);
        self.call_stack.pop();
        self.entry = outer;
        outcome
    }

    fn check_scope(&self, property: &PropertyInfo) -> Result<(), RuleError> {
        if self.rule().in_scope(property) {
            Ok(())
        } else {
            Err(RuleError::OutOfScope {
                rule: self.rule_id().clone(),
                property: *property,
            })
        }
    }

    pub(crate) fn into_output(self) -> ContextOutput {
        ContextOutput {
            results: self.results,
            outputs: self.outputs,
            dirty: self.dirty,
        }
    }
}

impl fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("rule", self.rule_id())
            .field("mode", &self.mode)
            .field("origin", &self.origin)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("results", &self.results.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::result::RuleSeverity;

    const P: Property<i64> = Property::new("Invoice", "Net");
    const Q: Property<i64> = Property::new("Invoice", "Tax");
    const R: Property<i64> = Property::new("Invoice", "Gross");

    fn entry(name: &str) -> RuleEntry {
        RuleEntry::from_fn(
            RuleDescriptor::builder(name).primary(P).affected(Q).build(),
            |_| Ok(()),
        )
    }

    #[test]
    fn results_default_to_primary_property() {
        let mut ctx = RuleContext::new(&entry("r"));
        ctx.add_error("bad");
        ctx.add_warning_for(Q, "meh").unwrap();

        let results = ctx.results();
        assert_eq!(results[0].property(), Some(P.info()));
        assert_eq!(results[0].rule().map(RuleId::as_str), Some("rule://r/Invoice.Net"));
        assert_eq!(results[1].property(), Some(Q.info()));
        assert_eq!(results[1].severity(), RuleSeverity::Warning);
    }

    #[test]
    fn outputs_are_limited_to_scope() {
        let mut ctx = RuleContext::new(&entry("r"));
        ctx.add_output(&P, 1).unwrap();
        ctx.add_output(&Q, 2).unwrap();
        let err = ctx.add_output(&R, 3).unwrap_err();

        assert!(matches!(err, RuleError::OutOfScope { property, .. } if property == R.info()));
        assert_eq!(ctx.outputs().len(), 2);
        assert!(ctx.add_dirty_property(R).is_err());
        assert!(ctx.add_error_for(R, "nope").is_err());
    }

    #[test]
    fn inputs_are_typed_and_checked() {
        let ctx = RuleContext::new(&entry("r"))
            .with_input(P, json!(10))
            .with_input(Q, Value::Null);

        assert_eq!(ctx.input(&P).unwrap(), 10);
        assert_eq!(ctx.try_input(&Q), None);
        assert!(matches!(
            ctx.input(&R),
            Err(RuleError::UndeclaredInput { .. })
        ));
    }

    #[test]
    fn chained_rule_shares_results_and_uses_its_own_scope() {
        let inner = RuleEntry::from_fn(
            RuleDescriptor::builder("inner").primary(P).affected(R).build(),
            |ctx| {
                ctx.add_output(&R, 99)?;
                ctx.add_information("from inner");
                Ok(())
            },
        );
        let mut ctx = RuleContext::new(&entry("outer"));
        ctx.execute_rule(&inner).unwrap();

        assert_eq!(ctx.rule_id().as_str(), "rule://outer/Invoice.Net");
        assert_eq!(ctx.outputs().get(&R.info()), Some(&json!(99)));
        assert_eq!(
            ctx.results()[0].rule().map(RuleId::as_str),
            Some("rule://inner/Invoice.Net")
        );
    }

    #[test]
    fn chained_rule_cycle_is_detected() {
        let outer = entry("outer");
        let mut ctx = RuleContext::new(&outer);
        let fault = ctx.execute_rule(&outer).unwrap_err();
        assert!(matches!(fault, RuleFault::Cycle(RuleError::ChainCycle { .. })));
    }

    #[test]
    fn transitive_chain_cycle_is_detected() {
        let outer = entry("outer");
        let outer_for_inner = outer.clone();
        let inner = RuleEntry::from_fn(
            RuleDescriptor::builder("inner").primary(P).build(),
            move |ctx| ctx.execute_rule(&outer_for_inner),
        );
        let mut ctx = RuleContext::new(&outer);
        let fault = ctx.execute_rule(&inner).unwrap_err();
        match fault {
            RuleFault::Cycle(RuleError::ChainCycle { rule, stack }) => {
                assert_eq!(rule, *outer.id());
                assert_eq!(stack, vec![outer.id().clone(), inner.id().clone()]);
            }
            other => panic!("unexpected fault: {other:?}"),
        }
        assert_eq!(ctx.rule_id(), outer.id());
    }
}
