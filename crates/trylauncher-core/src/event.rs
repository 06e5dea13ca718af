//! Typed publish/subscribe event bus.
//!
//! Events are plain values keyed by their concrete type. [`EventBus::publish`]
//! only enqueues; handlers run when [`EventBus::process`] drains the queue,
//! in the order they subscribed.

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::sync::Arc;

type Handler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

struct QueuedEvent {
    type_id: TypeId,
    type_name: &'static str,
    payload: Box<dyn Any + Send>,
}

/// Thread-safe event queue with per-type handler lists.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<TypeId, Vec<Handler>>>,
    queue: Mutex<VecDeque<QueuedEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of type `E`.
    pub fn subscribe<E, F>(&self, handler: F)
    where
        E: Send + 'static,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<E>() {
                handler(event);
            }
        });
        self.handlers
            .write()
            .entry(TypeId::of::<E>())
            .or_default()
            .push(handler);
    }

    /// Queue `event` for the next [`process`](Self::process).
    pub fn publish<E: Send + 'static>(&self, event: E) {
        self.queue.lock().push_back(QueuedEvent {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            payload: Box::new(event),
        });
    }

    /// Dispatch every queued event. Returns the number of events drained.
    ///
    /// Events published by handlers are queued for the next call.
    pub fn process(&self) -> usize {
        let drained: Vec<QueuedEvent> = self.queue.lock().drain(..).collect();

        for event in &drained {
            let handlers = self
                .handlers
                .read()
                .get(&event.type_id)
                .cloned()
                .unwrap_or_default();
            if handlers.is_empty() {
                tracing::trace!("No handlers for {}", event.type_name);
                continue;
            }
            for handler in &handlers {
                handler(event.payload.as_ref());
            }
        }

        drained.len()
    }

    /// Events waiting for dispatch.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn handler_count<E: 'static>(&self) -> usize {
        self.handlers
            .read()
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }

    /// Drop queued events without dispatching them.
    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handler_types", &self.handlers.read().len())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Window and device input, published by the application runner.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Key {
        /// Physical key name, e.g. `KeyW`.
        key: String,
        pressed: bool,
        repeat: bool,
    },
    MouseButton {
        button: u16,
        pressed: bool,
        x: f64,
        y: f64,
    },
    MouseMove {
        x: f64,
        y: f64,
        delta_x: f64,
        delta_y: f64,
    },
    MouseScroll {
        delta_x: f64,
        delta_y: f64,
    },
    Char(char),
    WindowResized {
        width: u32,
        height: u32,
    },
    WindowClose,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);

    #[derive(Debug)]
    struct Pong;

    #[test]
    fn publish_only_enqueues() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        bus.subscribe(move |_: &Ping| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Ping(1));
        bus.publish(Ping(2));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(bus.pending(), 2);

        assert_eq!(bus.process(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let log = Arc::clone(&log);
            bus.subscribe(move |ping: &Ping| log.lock().push((tag, ping.0)));
        }

        bus.publish(Ping(7));
        bus.process();
        assert_eq!(*log.lock(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn dispatch_is_keyed_by_type() {
        let bus = EventBus::new();
        let pings = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pings);
        bus.subscribe(move |_: &Ping| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Pong);
        bus.process();
        assert_eq!(pings.load(Ordering::SeqCst), 0);
        assert_eq!(bus.handler_count::<Ping>(), 1);
        assert_eq!(bus.handler_count::<Pong>(), 0);
    }

    #[test]
    fn events_published_while_processing_wait_for_next_pass() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.subscribe(move |ping: &Ping| {
            if ping.0 == 0 {
                inner.publish(Ping(1));
            }
        });

        bus.publish(Ping(0));
        assert_eq!(bus.process(), 1);
        assert_eq!(bus.pending(), 1);
        assert_eq!(bus.process(), 1);
        assert_eq!(bus.pending(), 0);
    }
}
