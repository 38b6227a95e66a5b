use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{EventEnvelope, Topic};

/// Opaque handle returned by [`EventRouter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

type Handler = Box<dyn FnMut(&EventEnvelope) -> anyhow::Result<()>>;

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    correlation_id: String,
    handler: Handler,
}

/// Demultiplexes the inbound event stream by topic and correlation id.
///
/// Events not addressed to a registered (topic, correlation id) pair are
/// silently dropped, never queued. Handler failures are isolated: one
/// failing handler does not prevent delivery to the others.
#[derive(Default)]
pub struct EventRouter {
    subscriptions: Vec<Subscription>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for events on `topic` whose correlation id equals
    /// `correlation_id`. The correlation id is always passed explicitly;
    /// there is no ambient "current session".
    pub fn subscribe<F>(
        &mut self,
        topic: Topic,
        correlation_id: impl Into<String>,
        handler: F,
    ) -> SubscriptionId
    where
        F: FnMut(&EventEnvelope) -> anyhow::Result<()> + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscriptions.push(Subscription {
            id,
            topic,
            correlation_id: correlation_id.into(),
            handler: Box::new(handler),
        });
        id
    }

    /// Remove a subscription. Safe to call with an already-removed id.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscriptions.retain(|s| s.id != id);
    }

    /// Deliver `envelope` to every matching handler. Returns how many
    /// handlers received it.
    pub fn dispatch(&mut self, envelope: &EventEnvelope) -> usize {
        let mut delivered = 0;
        for sub in &mut self.subscriptions {
            if sub.topic != envelope.topic || sub.correlation_id != envelope.correlation_id {
                continue;
            }
            delivered += 1;
            if let Err(e) = (sub.handler)(envelope) {
                warn!(
                    "handler error on {} event for {}: {}",
                    envelope.topic.as_wire(),
                    envelope.correlation_id,
                    e
                );
            }
        }
        if delivered == 0 {
            debug!(
                "dropped unaddressed {} event for {}",
                envelope.topic.as_wire(),
                envelope.correlation_id
            );
        }
        delivered
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn envelope(correlation_id: &str) -> EventEnvelope {
        EventEnvelope::new(Topic::Chat, correlation_id, json!({"type": "done", "success": true}))
    }

    #[test]
    fn test_delivers_only_matching_correlation_id() {
        let mut router = EventRouter::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_a = seen.clone();
        router.subscribe(Topic::Chat, "conv-a", move |env| {
            seen_a.borrow_mut().push(env.correlation_id.clone());
            Ok(())
        });

        assert_eq!(router.dispatch(&envelope("conv-a")), 1);
        assert_eq!(router.dispatch(&envelope("conv-b")), 0);
        assert_eq!(seen.borrow().as_slice(), ["conv-a"]);
    }

    #[test]
    fn test_topic_mismatch_is_dropped() {
        let mut router = EventRouter::new();
        let count = Rc::new(RefCell::new(0usize));
        let count_handler = count.clone();
        router.subscribe(Topic::Exploration, "exec-1", move |_| {
            *count_handler.borrow_mut() += 1;
            Ok(())
        });

        // Chat-topic envelope with the same correlation id must not match.
        router.dispatch(&envelope("exec-1"));
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let mut router = EventRouter::new();
        let reached = Rc::new(RefCell::new(false));

        router.subscribe(Topic::Chat, "conv-a", |_| anyhow::bail!("boom"));
        let reached_handler = reached.clone();
        router.subscribe(Topic::Chat, "conv-a", move |_| {
            *reached_handler.borrow_mut() = true;
            Ok(())
        });

        assert_eq!(router.dispatch(&envelope("conv-a")), 2);
        assert!(*reached.borrow());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mut router = EventRouter::new();
        let id = router.subscribe(Topic::Chat, "conv-a", |_| Ok(()));
        assert_eq!(router.subscription_count(), 1);

        router.unsubscribe(id);
        router.unsubscribe(id);
        assert_eq!(router.subscription_count(), 0);
        assert_eq!(router.dispatch(&envelope("conv-a")), 0);
    }
}
