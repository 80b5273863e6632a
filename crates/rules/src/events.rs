//! Rule engine notifications.
//!
//! Provides [`RuleEvent`] variants emitted while an object's rules run and
//! an [`EventBus`] backed by `tokio::sync::broadcast`.

use tokio::sync::broadcast;

use crate::property::PropertyInfo;

// ---------------------------------------------------------------------------
// RuleEvent
// ---------------------------------------------------------------------------

/// Events emitted by one object's dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleEvent {
    /// Every rule of a level finished and the tracker was updated.
    LevelCommitted {
        /// The level's property, `None` for object rules.
        property: Option<PropertyInfo>,
        /// Validity of that property (or the object) after the commit.
        valid: bool,
    },
    /// A cascade revisited a property and that branch was stopped.
    CycleDetected {
        /// The revisited property.
        property: PropertyInfo,
        /// Cascade path leading to it, origin first.
        path: Vec<PropertyInfo>,
    },
    /// A batch finished.
    BatchCompleted {
        /// Batch sequence number, starting at 1.
        batch: u64,
        /// Properties whose levels ran, in order.
        affected: Vec<PropertyInfo>,
    },
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast bus for [`RuleEvent`]s.
///
/// Emission is fire-and-forget: without subscribers, or when a subscriber
/// lags, events are dropped and the dispatcher never waits.
pub struct EventBus {
    sender: broadcast::Sender<RuleEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `buffer_size` events per subscriber.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit to all current subscribers.
    pub fn emit(&self, event: RuleEvent) {
        // no receivers is fine
        let _ = self.sender.send(event);
    }

    /// Receive every event emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuleEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGE: PropertyInfo = PropertyInfo::new("Person", "Age");

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.emit(RuleEvent::BatchCompleted {
            batch: 1,
            affected: vec![],
        });
    }

    #[tokio::test]
    async fn subscribers_all_receive() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(RuleEvent::LevelCommitted {
            property: Some(AGE),
            valid: false,
        });

        let expected = RuleEvent::LevelCommitted {
            property: Some(AGE),
            valid: false,
        };
        assert_eq!(rx1.recv().await.unwrap(), expected);
        assert_eq!(rx2.recv().await.unwrap(), expected);
    }
}
