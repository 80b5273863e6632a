//! Rule bodies.
//!
//! A rule body is either synchronous ([`Rule`]) or asynchronous
//! ([`AsyncRule`]). Both receive a mutable [`RuleContext`] and report
//! outcomes through it; returning `Err` is reserved for faults.
//!
//! Plain closures of shape `Fn(&mut RuleContext) -> Result<(), RuleFault>`
//! are rules too.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RuleContext;
use crate::descriptor::{RuleDescriptor, RuleId};
use crate::error::RuleFault;

/// Synchronous rule body.
pub trait Rule: Send + Sync {
    /// Evaluate the rule.
    fn execute(&self, ctx: &mut RuleContext) -> Result<(), RuleFault>;
}

impl<F> Rule for F
where
    F: Fn(&mut RuleContext) -> Result<(), RuleFault> + Send + Sync,
{
    fn execute(&self, ctx: &mut RuleContext) -> Result<(), RuleFault> {
        self(ctx)
    }
}

/// Asynchronous rule body.
///
/// Long-running bodies should watch
/// [`RuleContext::cancellation`] and return [`RuleFault::Cancelled`] when it
/// fires; the engine also stops awaiting a body once its batch is cancelled.
#[async_trait]
pub trait AsyncRule: Send + Sync {
    /// Evaluate the rule.
    async fn execute(&self, ctx: &mut RuleContext) -> Result<(), RuleFault>;
}

/// Sync or async body.
#[derive(Clone)]
pub enum RuleBody {
    /// Runs inline.
    Sync(Arc<dyn Rule>),
    /// Awaited by the dispatcher.
    Async(Arc<dyn AsyncRule>),
}

/// A registered rule: immutable descriptor plus body.
#[derive(Clone)]
pub struct RuleEntry {
    descriptor: Arc<RuleDescriptor>,
    body: RuleBody,
}

impl RuleEntry {
    /// Pair a descriptor with a synchronous body.
    pub fn new(descriptor: RuleDescriptor, rule: impl Rule + 'static) -> Self {
        Self::from_body(descriptor, RuleBody::Sync(Arc::new(rule)))
    }

    /// Pair a descriptor with a closure body.
    pub fn from_fn<F>(descriptor: RuleDescriptor, f: F) -> Self
    where
        F: Fn(&mut RuleContext) -> Result<(), RuleFault> + Send + Sync + 'static,
    {
        Self::new(descriptor, f)
    }

    /// Pair a descriptor with an asynchronous body.
    pub fn new_async(descriptor: RuleDescriptor, rule: impl AsyncRule + 'static) -> Self {
        Self::from_body(descriptor, RuleBody::Async(Arc::new(rule)))
    }

    /// Pair a descriptor with an existing body.
    pub fn from_body(mut descriptor: RuleDescriptor, body: RuleBody) -> Self {
        descriptor.is_async = matches!(body, RuleBody::Async(_));
        Self {
            descriptor: Arc::new(descriptor),
            body,
        }
    }

    /// Rule metadata.
    pub fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    /// Rule identity.
    pub fn id(&self) -> &RuleId {
        self.descriptor.id()
    }

    /// Rule body.
    pub fn body(&self) -> &RuleBody {
        &self.body
    }
}

impl fmt::Debug for RuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEntry")
            .field("id", self.id())
            .field("priority", &self.descriptor.priority())
            .field("async", &self.descriptor.is_async())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl AsyncRule for Noop {
        async fn execute(&self, _ctx: &mut RuleContext) -> Result<(), RuleFault> {
            Ok(())
        }
    }

    #[test]
    fn async_flag_follows_body() {
        let sync = RuleEntry::from_fn(RuleDescriptor::builder("s").build(), |_| Ok(()));
        let asynchronous = RuleEntry::new_async(RuleDescriptor::builder("a").build(), Noop);
        assert!(!sync.descriptor().is_async());
        assert!(asynchronous.descriptor().is_async());
    }

    #[test]
    fn debug_shows_identity() {
        let entry = RuleEntry::from_fn(RuleDescriptor::builder("s").priority(3).build(), |_| Ok(()));
        let debug = format!("{entry:?}");
        assert!(debug.contains("rule://s/(object)"));
        assert!(debug.contains("priority: 3"));
    }
}
