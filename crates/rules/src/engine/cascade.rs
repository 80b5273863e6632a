//! Batch execution.
//!
//! A batch runs levels (all rules of one property, or the object rules, for
//! one execution mode) and follows the cascade through an explicit work
//! queue. Each queue item remembers the path of properties that led to it:
//!
//! - `Declared` items come from affected-property and input declarations.
//!   They are skipped when their property is already on the path or was
//!   already evaluated in this batch, and they never expand further through
//!   declarations.
//! - `Written` items come from values a rule actually changed (or marked
//!   dirty). Reaching a property already on the path through a write is a
//!   cycle: the branch stops and the cycle is recorded as a broken rule.
//!
//! A level whose rules change its own property is re-run until the value
//! settles; one that never settles is reported as a cycle too.
//!
//! Paths are bounded by `max_cascade_depth`, so every batch terminates.

use std::collections::{HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::CheckOutcome;
use super::dispatch::{ObjectState, Plan, panic_message};
use crate::context::{ContextOutput, RuleContext};
use crate::descriptor::{ExecutionMode, RuleId};
use crate::error::{Result, RuleError, RuleFault};
use crate::events::RuleEvent;
use crate::object::BusinessObject;
use crate::property::PropertyInfo;
use crate::result::RuleResult;
use crate::rule::{RuleBody, RuleEntry};
use crate::tracker::LevelUpdate;

/// Owner of the broken rule recorded when a cascade revisits `property`.
pub fn cycle_rule_id(property: PropertyInfo) -> RuleId {
    RuleId::new("cascade-cycle", Some(&property))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Declared,
    Written,
}

#[derive(Debug)]
struct WorkItem {
    property: PropertyInfo,
    mode: ExecutionMode,
    path: Vec<PropertyInfo>,
    edge: Edge,
    expand: bool,
}

#[derive(Debug, Default)]
struct LevelReport {
    /// Affected properties of the rules that ran.
    declared: IndexSet<PropertyInfo>,
    /// Properties whose value changed or that a rule marked dirty.
    changed: IndexSet<PropertyInfo>,
}

struct BatchRun<'a> {
    state: &'a ObjectState,
    target: Arc<dyn BusinessObject>,
    token: &'a CancellationToken,
    evaluated: HashSet<PropertyInfo>,
    affected: IndexSet<PropertyInfo>,
    cancelled: bool,
}

impl ObjectState {
    pub(super) async fn run_batch(
        &self,
        batch: u64,
        plan: &Plan,
        token: &CancellationToken,
    ) -> Result<CheckOutcome> {
        let target = self.target.upgrade().ok_or(RuleError::TargetDropped {
            type_name: self.type_key.name(),
        })?;
        debug!(
            check_all = plan.check_all,
            object_rules = plan.object_rules,
            properties = plan.properties.len(),
            "batch started"
        );

        let mut run = BatchRun {
            state: self,
            target,
            token,
            evaluated: HashSet::new(),
            affected: IndexSet::new(),
            cancelled: false,
        };
        run.execute(plan).await?;

        let outcome = CheckOutcome {
            batch,
            affected_properties: run.affected.into_iter().collect(),
            cancelled: run.cancelled,
        };
        if outcome.cancelled {
            warn!(batch, "batch cancelled");
        }
        self.events.emit(RuleEvent::BatchCompleted {
            batch,
            affected: outcome.affected_properties.clone(),
        });
        debug!(
            affected = outcome.affected_properties.len(),
            valid = self.tracker.is_valid(),
            "batch completed"
        );
        Ok(outcome)
    }
}

impl BatchRun<'_> {
    async fn execute(&mut self, plan: &Plan) -> Result<()> {
        if plan.check_all {
            return self.check_all().await;
        }

        let mut origins = plan.properties.clone();
        if plan.object_rules {
            let report = self.run_level(None, ExecutionMode::CheckObjectRules).await?;
            origins.extend(report.changed);
        }
        for property in origins {
            if self.cancelled {
                break;
            }
            self.cascade(property).await?;
        }
        Ok(())
    }

    /// Object rules, then every property once, without cascading.
    async fn check_all(&mut self) -> Result<()> {
        self.run_level(None, ExecutionMode::CheckRules).await?;
        for property in self.state.rules.primary_properties() {
            if self.cancelled {
                break;
            }
            self.run_level(Some(property), ExecutionMode::CheckRules).await?;
        }
        Ok(())
    }

    async fn cascade(&mut self, origin: PropertyInfo) -> Result<()> {
        let config = Arc::clone(&self.state.config);
        let mut queue = VecDeque::from([WorkItem {
            property: origin,
            mode: ExecutionMode::PropertyChanged,
            path: Vec::new(),
            edge: Edge::Written,
            expand: true,
        }]);

        while let Some(item) = queue.pop_front() {
            if self.cancelled {
                break;
            }
            let revisit = item.path.contains(&item.property);
            let too_deep = item.path.len() >= config.max_cascade_depth;
            match item.edge {
                Edge::Declared if revisit || self.evaluated.contains(&item.property) => {
                    trace!(property = %item.property, "declared dependency already evaluated");
                    continue;
                }
                Edge::Written if revisit => {
                    self.report_cycle(item.property, &item.path, "Cycle detected");
                    continue;
                }
                _ if too_deep => {
                    self.report_cycle(item.property, &item.path, "Cascade depth limit exceeded");
                    continue;
                }
                _ => {}
            }

            let mut report = self.run_level(Some(item.property), item.mode).await?;
            let mut settling = report.changed.contains(&item.property);
            let mut reruns = 0;
            while settling && !self.cancelled {
                if item.path.len() + reruns + 1 >= config.max_cascade_depth {
                    let mut path = item.path.clone();
                    path.push(item.property);
                    self.report_cycle(item.property, &path, "Cycle detected");
                    break;
                }
                reruns += 1;
                trace!(property = %item.property, reruns, "level changed its own property");
                let again = self.run_level(Some(item.property), item.mode).await?;
                settling = again.changed.contains(&item.property);
                report.declared.extend(again.declared);
                report.changed.extend(again.changed);
            }
            if self.cancelled {
                break;
            }

            let mut path = item.path;
            path.push(item.property);
            for property in report.changed.iter().filter(|p| **p != item.property) {
                queue.push_back(WorkItem {
                    property: *property,
                    mode: ExecutionMode::Cascade,
                    path: path.clone(),
                    edge: Edge::Written,
                    expand: config.cascade_on_dirty_properties,
                });
            }
            if item.expand {
                let dependents = self.state.rules.dependents_of(item.property);
                let declared = report
                    .declared
                    .iter()
                    .chain(dependents.iter())
                    .filter(|p| **p != item.property && !report.changed.contains(*p));
                for property in declared {
                    queue.push_back(WorkItem {
                        property: *property,
                        mode: ExecutionMode::Cascade,
                        path: path.clone(),
                        edge: Edge::Declared,
                        expand: false,
                    });
                }
            }
        }
        Ok(())
    }

    fn report_cycle(&mut self, property: PropertyInfo, path: &[PropertyInfo], reason: &str) {
        let chain = path
            .iter()
            .chain(std::iter::once(&property))
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");
        warn!(property = %property, path = %chain, "{reason}");

        let owner = cycle_rule_id(property);
        let result = RuleResult::error(format!("{reason}: {chain}"))
            .with_property(property)
            .with_rule(owner.clone());
        let mut update = LevelUpdate::default();
        update.replace(owner, vec![result]);
        self.state.tracker.commit(update);
        self.state.events.emit(RuleEvent::CycleDetected {
            property,
            path: path.to_vec(),
        });
    }

    /// Run every rule of one level and commit the tracker changes at once.
    async fn run_level(
        &mut self,
        property: Option<PropertyInfo>,
        mode: ExecutionMode,
    ) -> Result<LevelReport> {
        let state = self.state;
        let mut report = LevelReport::default();
        if self.token.is_cancelled() {
            self.cancelled = true;
            return Ok(report);
        }

        let rules: Vec<&RuleEntry> = match property {
            Some(p) => state.rules.rules_for(p, mode).collect(),
            None => state.rules.object_rules(mode).collect(),
        };
        let mut update = LevelUpdate::default();
        if let Some(p) = property {
            update.clear(cycle_rule_id(p));
        }

        let mut stopped = false;
        let mut has_error = false;
        for entry in rules {
            let descriptor = entry.descriptor();
            let short_circuit = has_error
                && state
                    .config
                    .process_through_priority
                    .is_some_and(|limit| descriptor.priority() > limit);
            if stopped || short_circuit {
                trace!(rule = %descriptor.id(), "rule skipped");
                update.clear(descriptor.id().clone());
                continue;
            }

            let Some(output) = self.dispatch(entry, property, mode).await? else {
                self.cancelled = true;
                break;
            };

            for (written, value) in &output.outputs {
                if self.write_back(written, value)? {
                    report.changed.insert(*written);
                }
            }
            for dirty in &output.dirty {
                self.target.mark_dirty(dirty);
                state.cache.invalidate(dirty);
                report.changed.insert(*dirty);
            }
            report
                .declared
                .extend(descriptor.affected_properties().iter().copied());
            has_error |= output.results.iter().any(RuleResult::is_error);
            stopped |= output.results.iter().any(RuleResult::is_stop_processing);
            update.replace(descriptor.id().clone(), output.results);
        }

        state.tracker.commit(update);
        if let Some(p) = property {
            self.evaluated.insert(p);
            self.affected.insert(p);
        }
        let valid = match property {
            Some(p) => state.tracker.is_property_valid(&p),
            None => state.tracker.is_valid(),
        };
        state
            .events
            .emit(RuleEvent::LevelCommitted { property, valid });
        debug!(property = ?property, %mode, valid, "level committed");
        Ok(report)
    }

    /// Run one rule; `None` means it was cancelled and contributes nothing.
    async fn dispatch(
        &self,
        entry: &RuleEntry,
        property: Option<PropertyInfo>,
        mode: ExecutionMode,
    ) -> Result<Option<ContextOutput>> {
        let descriptor = entry.descriptor();
        if self.token.is_cancelled() {
            return Ok(None);
        }

        let inputs: IndexMap<PropertyInfo, Value> = descriptor
            .read_set()
            .iter()
            .map(|p| (*p, self.target.read_property(p).unwrap_or(Value::Null)))
            .collect();
        let stamp = (self.state.config.cache_enabled && descriptor.is_cacheable())
            .then(|| (crate::cache::snapshot_hash(descriptor.id(), &inputs), inputs.clone()));
        if let Some((hash, snapshot)) = &stamp {
            if let Some(hit) = self.state.cache.lookup(descriptor.id(), *hash, snapshot) {
                debug!(rule = %descriptor.id(), "served from cache");
                return Ok(Some(hit));
            }
        }

        let mut ctx = RuleContext::for_dispatch(
            entry,
            Arc::downgrade(&self.target),
            inputs,
            property,
            mode,
            self.token.clone(),
        );
        let started = Instant::now();
        let outcome = match entry.body() {
            RuleBody::Sync(rule) => catch_unwind(AssertUnwindSafe(|| rule.execute(&mut ctx)))
                .unwrap_or_else(|panic| Err(panic_fault(panic.as_ref()))),
            RuleBody::Async(rule) => {
                let execution = AssertUnwindSafe(rule.execute(&mut ctx)).catch_unwind();
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => Err(RuleFault::Cancelled),
                    outcome = execution => {
                        outcome.unwrap_or_else(|panic| Err(panic_fault(panic.as_ref())))
                    }
                }
            }
        };
        trace!(rule = %descriptor.id(), elapsed = ?started.elapsed(), "rule executed");

        match outcome {
            Ok(()) => {
                let output = ctx.into_output();
                if let Some((hash, snapshot)) = stamp {
                    self.state
                        .cache
                        .store(descriptor.id().clone(), hash, snapshot, output.clone());
                }
                Ok(Some(output))
            }
            Err(RuleFault::Cancelled) => {
                debug!(rule = %descriptor.id(), "rule cancelled");
                Ok(None)
            }
            Err(RuleFault::Config(error)) => {
                warn!(rule = %descriptor.id(), %error, "rule configuration error, aborting batch");
                Err(error)
            }
            Err(fault) => {
                warn!(rule = %descriptor.id(), error = %fault, "rule failed");
                let mut output = ctx.into_output();
                output.outputs.clear();
                output.dirty.clear();
                let mut result = RuleResult::error(fault.to_string())
                    .with_rule(descriptor.id().clone())
                    .with_cause(Arc::new(fault));
                result.property = descriptor.primary_property();
                output.results.push(result);
                Ok(Some(output))
            }
        }
    }

    /// Store `value` unless the object already holds it. Returns whether it changed.
    fn write_back(&self, property: &PropertyInfo, value: &Value) -> Result<bool> {
        let unchanged = match self.target.read_property(property) {
            Some(current) => current == *value,
            None => value.is_null(),
        };
        if unchanged {
            return Ok(false);
        }
        self.target.write_property(property, value.clone())?;
        self.target.mark_dirty(property);
        let purged = self.state.cache.invalidate(property);
        trace!(property = %property, purged, "value written back");
        Ok(true)
    }
}

fn panic_fault(payload: &(dyn std::any::Any + Send)) -> RuleFault {
    RuleFault::fail(format!("rule panicked: {}", panic_message(payload)))
}
