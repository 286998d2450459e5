//! Hook bus
//!
//! Each entity owns a [`HookBus`]. Subscribers register either for a single
//! [`HookKind`] or for every event through the catch-all `any` channel.
//! Handlers are plain synchronous closures and run in registration order on
//! the emitting task; a handler may itself emit on the same bus.

pub mod event;

pub use event::{HookEvent, HookKind};

use crate::lock::{rw_read, rw_write};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Callback invoked for each matching event
pub type HookHandler = Arc<dyn Fn(&HookEvent) + Send + Sync>;

/// Token returned by a subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    // None subscribes to every event
    topic: Option<HookKind>,
    handler: HookHandler,
}

/// Named-event channel with a catch-all `any` topic
#[derive(Default)]
pub struct HookBus {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one kind of event
    pub fn on<F>(&self, kind: HookKind, handler: F) -> SubscriptionId
    where
        F: Fn(&HookEvent) + Send + Sync + 'static,
    {
        self.add(Some(kind), Arc::new(handler))
    }

    /// Subscribe to every event fired on this bus
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&HookEvent) + Send + Sync + 'static,
    {
        self.add(None, Arc::new(handler))
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscribers = rw_write(&self.subscribers, "hooks.off");
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Deliver an event to every matching subscriber
    pub fn emit(&self, event: &HookEvent) {
        let kind = event.kind();
        // Snapshot so handlers can subscribe or emit without deadlocking
        let handlers: Vec<HookHandler> = rw_read(&self.subscribers, "hooks.emit")
            .iter()
            .filter(|s| s.topic.is_none_or(|topic| topic == kind))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        rw_read(&self.subscribers, "hooks.subscriber_count").len()
    }

    fn add(&self, topic: Option<HookKind>, handler: HookHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        rw_write(&self.subscribers, "hooks.add").push(Subscriber { id, topic, handler });
        id
    }
}

impl fmt::Debug for HookBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(bus: &HookBus) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on_any(move |e| sink.lock().unwrap().push(e.name().to_string()));
        seen
    }

    #[test]
    fn named_subscribers_only_see_their_kind() {
        let bus = HookBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        bus.on(HookKind::Ready, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&HookEvent::BeforeScan);
        bus.emit(&HookEvent::Ready);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn any_sees_everything() {
        let bus = HookBus::new();
        let seen = recorder(&bus);

        bus.emit(&HookEvent::BeforeRelease);
        bus.emit(&HookEvent::AfterRelease);
        assert_eq!(*seen.lock().unwrap(), vec!["beforeRelease", "afterRelease"]);
    }

    #[test]
    fn off_unsubscribes() {
        let bus = HookBus::new();
        let id = bus.on_any(|_| panic!("should not be called"));
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(&HookEvent::Ready);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn handlers_may_emit_reentrantly() {
        let bus = Arc::new(HookBus::new());
        let seen = recorder(&bus);
        let inner = Arc::downgrade(&bus);
        bus.on(HookKind::BeforeScan, move |_| {
            if let Some(bus) = inner.upgrade() {
                bus.emit(&HookEvent::ExtendLife { from: 1.0, by: 1.0 });
            }
        });

        bus.emit(&HookEvent::BeforeScan);
        assert_eq!(*seen.lock().unwrap(), vec!["beforeScan", "extendLife"]);
    }
}
