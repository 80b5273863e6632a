//! Single-flight batch dispatcher.
//!
//! Every trigger merges its work into the object's pending [`Plan`] and
//! waits on a oneshot channel. The first trigger to find the object idle
//! spawns a driver task, which keeps taking the whole pending plan as one
//! batch until nothing is left. At most one batch per object runs at a time,
//! and triggers arriving mid-batch coalesce into the next one.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::join_all;
use indexmap::IndexSet;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, debug_span, error};

use super::CheckOutcome;
use crate::cache::RuleCache;
use crate::config::EngineConfig;
use crate::error::{Result, RuleError};
use crate::events::EventBus;
use crate::object::{BusinessObject, TypeKey};
use crate::property::PropertyInfo;
use crate::registry::RuleSet;
use crate::tracker::BrokenRulesTracker;

/// Work requested by one or more triggers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct Plan {
    /// Full check: object rules plus every property.
    pub check_all: bool,
    /// Object rules only.
    pub object_rules: bool,
    /// Properties to check with cascade, in trigger order.
    pub properties: IndexSet<PropertyInfo>,
}

impl Plan {
    pub fn all() -> Self {
        Self {
            check_all: true,
            ..Self::default()
        }
    }

    pub fn object_rules() -> Self {
        Self {
            object_rules: true,
            ..Self::default()
        }
    }

    pub fn property(property: PropertyInfo) -> Self {
        Self {
            properties: IndexSet::from([property]),
            ..Self::default()
        }
    }

    fn merge(&mut self, other: Plan) {
        self.check_all |= other.check_all;
        self.object_rules |= other.object_rules;
        self.properties.extend(other.properties);
    }
}

type Waiter = oneshot::Sender<Result<CheckOutcome>>;

#[derive(Default)]
struct Queue {
    plan: Plan,
    tokens: Vec<CancellationToken>,
    waiters: Vec<Waiter>,
    running: bool,
}

/// Everything the engine keeps per attached object.
pub(super) struct ObjectState {
    pub target: Weak<dyn BusinessObject>,
    pub type_key: TypeKey,
    pub rules: Arc<RuleSet>,
    pub config: Arc<EngineConfig>,
    pub tracker: BrokenRulesTracker,
    pub cache: RuleCache,
    pub events: EventBus,
    queue: Mutex<Queue>,
    batches: AtomicU64,
    suppressed: AtomicBool,
}

impl ObjectState {
    pub fn new(
        target: Weak<dyn BusinessObject>,
        type_key: TypeKey,
        rules: Arc<RuleSet>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            target,
            type_key,
            rules,
            config,
            tracker: BrokenRulesTracker::new(),
            cache: RuleCache::default(),
            events,
            queue: Mutex::new(Queue::default()),
            batches: AtomicU64::new(0),
            suppressed: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.queue.lock().running
    }

    pub fn batches_completed(&self) -> u64 {
        self.batches.load(Ordering::Acquire)
    }

    pub fn set_suppressed(&self, suppressed: bool) {
        self.suppressed.store(suppressed, Ordering::Release);
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::Acquire)
    }

    /// Queue `plan` and wait for the batch that covers it.
    pub async fn submit(self: &Arc<Self>, plan: Plan, token: CancellationToken) -> Result<CheckOutcome> {
        if self.is_suppressed() {
            debug!(type_name = self.type_key.name(), "rule checks suppressed");
            return Ok(CheckOutcome::default());
        }

        let (tx, rx) = oneshot::channel();
        let spawn = {
            let mut queue = self.queue.lock();
            queue.plan.merge(plan);
            queue.tokens.push(token);
            queue.waiters.push(tx);
            !std::mem::replace(&mut queue.running, true)
        };
        if spawn {
            tokio::spawn(Arc::clone(self).drive());
        }

        rx.await.map_err(|_| RuleError::DispatcherGone)?
    }

    async fn drive(self: Arc<Self>) {
        loop {
            let (plan, tokens, waiters) = {
                let mut queue = self.queue.lock();
                if queue.waiters.is_empty() {
                    queue.running = false;
                    return;
                }
                (
                    std::mem::take(&mut queue.plan),
                    std::mem::take(&mut queue.tokens),
                    std::mem::take(&mut queue.waiters),
                )
            };

            let batch = self.batches_completed() + 1;
            let span = debug_span!(
                "rule_batch",
                batch,
                type_name = self.type_key.name(),
                triggers = waiters.len()
            );
            let (token, _watch) = combine_tokens(tokens);
            let outcome = AssertUnwindSafe(self.run_batch(batch, &plan, &token))
                .catch_unwind()
                .instrument(span)
                .await
                .unwrap_or_else(|panic| {
                    error!(batch, panic = %panic_message(panic.as_ref()), "rule batch panicked");
                    Err(RuleError::DispatcherGone)
                });
            self.batches.fetch_add(1, Ordering::AcqRel);

            for waiter in waiters {
                // the caller may have stopped waiting
                let _ = waiter.send(outcome.clone());
            }
        }
    }
}

/// A token that fires once every contributing token has fired.
///
/// The returned guard stops the watcher task when the batch ends.
fn combine_tokens(mut tokens: Vec<CancellationToken>) -> (CancellationToken, Option<DropGuard>) {
    if tokens.len() <= 1 {
        return (tokens.pop().unwrap_or_else(CancellationToken::new), None);
    }

    let combined = CancellationToken::new();
    if tokens.iter().all(CancellationToken::is_cancelled) {
        combined.cancel();
        return (combined, None);
    }

    let done = CancellationToken::new();
    let (watch, stop) = (combined.clone(), done.clone());
    tokio::spawn(async move {
        tokio::select! {
            _ = join_all(tokens.iter().map(CancellationToken::cancelled)) => watch.cancel(),
            () = stop.cancelled() => {}
        }
    });
    (combined, Some(done.drop_guard()))
}

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
