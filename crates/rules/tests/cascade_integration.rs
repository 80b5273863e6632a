//! Integration tests for property levels and the write-back cascade.
//!
//! Covers priority ordering, stop-processing, write scope, dependent
//! properties and cycle detection through the public engine API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use corvid_rules::engine::cycle_rule_id;
use corvid_rules::prelude::*;
use corvid_rules::Result;
use pretty_assertions::assert_eq;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

const A: Property<i64> = Property::new("Entity", "A");
const B: Property<i64> = Property::new("Entity", "B");
const C: Property<i64> = Property::new("Entity", "C");
const AGE: Property<i64> = Property::new("Entity", "Age");
const NAME: Property<String> = Property::new("Entity", "Name");
const PRICE: Property<i64> = Property::new("Entity", "Price");
const QTY: Property<i64> = Property::new("Entity", "Qty");
const TOTAL: Property<i64> = Property::new("Entity", "Total");

#[derive(Default)]
struct Entity {
    values: PropertyBag,
}

impl BusinessObject for Entity {
    fn read_property(&self, property: &PropertyInfo) -> Option<Value> {
        self.values.read(property)
    }

    fn write_property(&self, property: &PropertyInfo, value: Value) -> Result<()> {
        self.values.store(property, value);
        Ok(())
    }

    fn mark_dirty(&self, property: &PropertyInfo) {
        self.values.mark_dirty(property);
    }
}

fn attach(rules: Vec<RuleEntry>) -> (Arc<Entity>, Arc<BusinessRules>) {
    attach_with(rules, EngineConfig::default())
}

fn attach_with(rules: Vec<RuleEntry>, config: EngineConfig) -> (Arc<Entity>, Arc<BusinessRules>) {
    let registry = Arc::new(RuleRegistry::new());
    for rule in rules {
        registry.register::<Entity>(rule).unwrap();
    }
    let engine = RuleEngine::with_config(registry, config).unwrap();
    let entity = Arc::new(Entity::default());
    let rules = engine.attach(&entity).unwrap();
    (entity, rules)
}

fn messages(results: &[RuleResult]) -> Vec<&str> {
    results.iter().map(RuleResult::message).collect()
}

/// `target = source + 1`, treating unset values as zero.
fn increment(name: &str, source: Property<i64>, target: Property<i64>) -> RuleEntry {
    let descriptor = RuleDescriptor::builder(name)
        .primary(source)
        .affected(target)
        .build();
    RuleEntry::from_fn(descriptor, move |ctx| {
        let value = ctx.try_input(&source).unwrap_or(0);
        ctx.add_output(&target, value + 1)?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Validation round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn negative_age_is_broken_until_fixed() {
    let (entity, rules) = attach(vec![common::min_value(AGE, 0)]);

    entity.values.set(&AGE, -1).unwrap();
    rules.property_changed(AGE).await.unwrap();
    assert!(!rules.is_valid());
    assert_eq!(
        messages(&rules.broken_rules_for(AGE)),
        vec!["Age must be at least 0"]
    );

    entity.values.set(&AGE, 30).unwrap();
    rules.property_changed(AGE).await.unwrap();
    assert!(rules.is_valid());
    assert!(rules.broken_rules().is_empty());
}

#[tokio::test]
async fn full_check_covers_properties_and_object_rules() {
    let ordered = RuleEntry::from_fn(
        RuleDescriptor::builder("a_before_b").input(A).input(B).build(),
        |ctx| {
            let a = ctx.try_input(&A).unwrap_or(0);
            let b = ctx.try_input(&B).unwrap_or(0);
            if a > b {
                ctx.add_error("A must not exceed B");
            }
            Ok(())
        },
    );
    let (entity, rules) = attach(vec![common::required(NAME), ordered]);
    entity.values.set(&A, 5).unwrap();
    entity.values.set(&B, 1).unwrap();

    let outcome = rules.check_rules().await.unwrap();
    assert_eq!(outcome.affected_properties, vec![NAME.info()]);
    assert_eq!(messages(&rules.broken_rules_for(NAME)), vec!["Name is required"]);
    assert_eq!(
        messages(&rules.tracker().object_broken_rules()),
        vec!["A must not exceed B"]
    );
    assert_eq!(rules.tracker().error_count(), 2);
}

// ---------------------------------------------------------------------------
// Level ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_processing_skips_lower_priority_rules() {
    let late_runs = Arc::new(AtomicUsize::new(0));
    let late = {
        let late_runs = Arc::clone(&late_runs);
        RuleEntry::from_fn(
            RuleDescriptor::builder("late").primary(A).priority(10).build(),
            move |ctx| {
                late_runs.fetch_add(1, Ordering::SeqCst);
                ctx.add_error("late");
                Ok(())
            },
        )
    };
    let gate = RuleEntry::from_fn(
        RuleDescriptor::builder("gate").primary(A).priority(5).build(),
        |ctx| {
            ctx.add_error_and_stop("gate");
            Ok(())
        },
    );
    let (_entity, rules) = attach(vec![late, gate]);

    rules.check_property(A).await.unwrap();

    assert_eq!(messages(&rules.broken_rules_for(A)), vec!["gate"]);
    assert_eq!(late_runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn results_follow_priority_order() {
    let error = |name: &'static str, priority: i32| {
        RuleEntry::from_fn(
            RuleDescriptor::builder(name).primary(A).priority(priority).build(),
            move |ctx| {
                ctx.add_error(name);
                Ok(())
            },
        )
    };
    let (_entity, rules) = attach(vec![error("late", 10), error("early", 5)]);

    rules.check_property(A).await.unwrap();
    assert_eq!(messages(&rules.broken_rules_for(A)), vec!["early", "late"]);

    rules.check_property(A).await.unwrap();
    assert_eq!(messages(&rules.broken_rules_for(A)), vec!["early", "late"]);
}

#[tokio::test]
async fn process_through_priority_short_circuits_after_error() {
    let later_runs = Arc::new(AtomicUsize::new(0));
    let first = RuleEntry::from_fn(
        RuleDescriptor::builder("first").primary(A).priority(0).build(),
        |ctx| {
            ctx.add_error("first");
            Ok(())
        },
    );
    let later = {
        let later_runs = Arc::clone(&later_runs);
        RuleEntry::from_fn(
            RuleDescriptor::builder("later").primary(A).priority(1).build(),
            move |_ctx| {
                later_runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
    };
    let config = EngineConfig {
        process_through_priority: Some(0),
        ..EngineConfig::default()
    };
    let (_entity, rules) = attach_with(vec![first, later], config);

    rules.check_property(A).await.unwrap();

    assert_eq!(messages(&rules.broken_rules_for(A)), vec!["first"]);
    assert_eq!(later_runs.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Write-back and scope
// ---------------------------------------------------------------------------

fn line_total() -> RuleEntry {
    let descriptor = RuleDescriptor::builder("line_total")
        .primary(PRICE)
        .input(QTY)
        .affected(TOTAL)
        .build();
    RuleEntry::from_fn(descriptor, |ctx| {
        let price = ctx.try_input(&PRICE).unwrap_or(0);
        let qty = ctx.try_input(&QTY).unwrap_or(0);
        ctx.add_output(&TOTAL, price * qty)?;
        Ok(())
    })
}

#[tokio::test]
async fn write_back_cascades_into_affected_property() {
    let (entity, rules) = attach(vec![line_total(), common::max_value(TOTAL, 100)]);
    entity.values.set(&PRICE, 20).unwrap();
    entity.values.set(&QTY, 10).unwrap();

    let outcome = rules.property_changed(PRICE).await.unwrap();

    assert_eq!(entity.values.get(&TOTAL), Some(200));
    assert_eq!(outcome.affected_properties, vec![PRICE.info(), TOTAL.info()]);
    assert!(!rules.is_property_valid(TOTAL));
    assert!(rules.is_property_valid(PRICE));
}

#[tokio::test]
async fn calculation_rule_runs_once_per_change() {
    let runs = Arc::new(AtomicUsize::new(0));
    let double = {
        let runs = Arc::clone(&runs);
        RuleEntry::from_fn(
            RuleDescriptor::builder("double").primary(A).affected(B).build(),
            move |ctx| {
                runs.fetch_add(1, Ordering::SeqCst);
                let a = ctx.try_input(&A).unwrap_or(0);
                ctx.add_output(&B, a * 2)?;
                Ok(())
            },
        )
    };
    let (entity, rules) = attach(vec![double, common::max_value(B, 5)]);
    entity.values.set(&A, 3).unwrap();
    entity.values.mark_clean();

    let outcome = rules.property_changed(A).await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.affected_properties, vec![A.info(), B.info()]);
    assert_eq!(entity.values.get(&B), Some(6));
    assert_eq!(entity.values.dirty_properties(), vec![B.info()]);
    assert!(!rules.is_property_valid(B));
}

#[tokio::test]
async fn input_change_reaches_dependent_rules() {
    let (entity, rules) = attach(vec![line_total(), common::max_value(TOTAL, 100)]);
    entity.values.set(&PRICE, 20).unwrap();
    entity.values.set(&QTY, 10).unwrap();
    rules.property_changed(PRICE).await.unwrap();

    entity.values.set(&QTY, 2).unwrap();
    let outcome = rules.property_changed(QTY).await.unwrap();

    assert_eq!(entity.values.get(&TOTAL), Some(40));
    assert_eq!(
        outcome.affected_properties,
        vec![QTY.info(), PRICE.info(), TOTAL.info()]
    );
    assert!(rules.is_valid());
}

#[tokio::test]
async fn write_outside_scope_is_a_configuration_error() {
    let rogue = RuleEntry::from_fn(
        RuleDescriptor::builder("rogue").primary(A).affected(B).build(),
        |ctx| {
            ctx.add_output(&B, 1)?;
            ctx.add_output(&C, 1)?;
            Ok(())
        },
    );
    let (entity, rules) = attach(vec![rogue]);

    let err = rules.check_property(A).await.unwrap_err();

    assert!(matches!(err, RuleError::OutOfScope { property, .. } if property == C.info()));
    assert_eq!(entity.values.get(&B), None);
    assert_eq!(entity.values.get(&C), None);
}

#[tokio::test]
async fn unchanged_output_is_not_written() {
    let (entity, rules) = attach(vec![increment("next", A, B)]);
    entity.values.set(&A, 1).unwrap();
    entity.values.set(&B, 2).unwrap();
    entity.values.mark_clean();

    let outcome = rules.property_changed(A).await.unwrap();

    assert_eq!(outcome.affected_properties, vec![A.info(), B.info()]);
    assert!(!entity.values.is_dirty(&B.info()));
    assert_eq!(entity.values.get(&B), Some(2));
}

#[tokio::test]
async fn self_normalizing_rule_settles() {
    let trim = RuleEntry::from_fn(RuleDescriptor::builder("trim").primary(NAME).build(), |ctx| {
        if let Some(name) = ctx.try_input(&NAME) {
            ctx.add_output(&NAME, name.trim().to_string())?;
        }
        Ok(())
    });
    let (entity, rules) = attach(vec![trim, common::min_length(NAME, 2)]);
    entity.values.set(&NAME, "  Ada  ".to_string()).unwrap();

    rules.property_changed(NAME).await.unwrap();

    assert_eq!(entity.values.get(&NAME), Some("Ada".to_string()));
    assert!(rules.is_valid());
}

// ---------------------------------------------------------------------------
// Cycles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mutual_writes_are_reported_as_cycle() {
    let (_entity, rules) = attach(vec![increment("a_to_b", A, B), increment("b_to_a", B, A)]);
    let mut events = rules.subscribe();

    rules.property_changed(A).await.unwrap();

    assert!(!rules.is_property_valid(A));
    let cycle = rules
        .broken_rules_for(A)
        .into_iter()
        .find(|r| r.rule() == Some(&cycle_rule_id(A.info())))
        .expect("cycle recorded against A");
    assert!(cycle.message().starts_with("Cycle detected"));

    let mut cycles = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, RuleEvent::CycleDetected { .. }) {
            cycles += 1;
        }
    }
    assert!(cycles >= 1);
}

#[tokio::test]
async fn converging_mutual_copies_are_not_cycles() {
    let copy = |name: &str, source: Property<i64>, target: Property<i64>| {
        let descriptor = RuleDescriptor::builder(name)
            .primary(source)
            .affected(target)
            .build();
        RuleEntry::from_fn(descriptor, move |ctx| {
            if let Some(value) = ctx.try_input(&source) {
                ctx.add_output(&target, value)?;
            }
            Ok(())
        })
    };
    let (entity, rules) = attach(vec![copy("a_to_b", A, B), copy("b_to_a", B, A)]);
    entity.values.set(&A, 5).unwrap();

    rules.property_changed(A).await.unwrap();

    assert_eq!(entity.values.get(&B), Some(5));
    assert!(rules.is_valid());
}

#[tokio::test]
async fn long_chains_stop_at_depth_limit() {
    let config = EngineConfig {
        max_cascade_depth: 2,
        ..EngineConfig::default()
    };
    let (entity, rules) = attach_with(vec![increment("a_to_b", A, B), increment("b_to_c", B, C)], config);
    entity.values.set(&A, 1).unwrap();

    rules.property_changed(A).await.unwrap();

    assert_eq!(entity.values.get(&B), Some(2));
    let broken = rules.broken_rules_for(C);
    assert_eq!(broken.len(), 1);
    assert!(broken[0].message().starts_with("Cascade depth limit exceeded"));
    assert_eq!(broken[0].rule(), Some(&cycle_rule_id(C.info())));
}

#[tokio::test]
async fn chained_self_invocation_becomes_error_result() {
    let slot: Arc<OnceLock<RuleEntry>> = Arc::new(OnceLock::new());
    let recursive = {
        let slot = Arc::clone(&slot);
        RuleEntry::from_fn(RuleDescriptor::builder("recursive").primary(A).build(), move |ctx| {
            if let Some(me) = slot.get() {
                ctx.execute_rule(me)?;
            }
            Ok(())
        })
    };
    slot.set(recursive.clone()).unwrap();
    let (_entity, rules) = attach(vec![recursive]);

    let outcome = rules.check_property(A).await.unwrap();

    assert_eq!(outcome.affected_properties, vec![A.info()]);
    let broken = rules.broken_rules_for(A);
    assert_eq!(broken.len(), 1);
    assert!(broken[0].message().starts_with("Chained rule cycle"));
    assert!(broken[0].cause().is_some());
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_rule_becomes_error_and_discards_outputs() {
    let flaky = RuleEntry::from_fn(
        RuleDescriptor::builder("flaky").primary(A).affected(B).build(),
        |ctx| {
            ctx.add_output(&B, 7)?;
            Err(RuleFault::fail("backend unavailable"))
        },
    );
    let (entity, rules) = attach(vec![flaky]);

    rules.check_property(A).await.unwrap();

    assert_eq!(messages(&rules.broken_rules_for(A)), vec!["backend unavailable"]);
    assert_eq!(entity.values.get(&B), None);
}

#[tokio::test]
async fn panicking_rule_becomes_error() {
    let boom = RuleEntry::from_fn(RuleDescriptor::builder("boom").primary(A).build(), |_ctx| {
        panic!("boom")
    });
    let (_entity, rules) = attach(vec![boom, common::min_value(B, 0)]);

    rules.check_property(A).await.unwrap();

    assert_eq!(messages(&rules.broken_rules_for(A)), vec!["rule panicked: boom"]);
    assert!(rules.is_property_valid(B));
}
