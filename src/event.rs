//! Typed publish/subscribe for engine lifecycle notifications.
//!
//! Handlers are registered per [`EventKind`] and run synchronously, in
//! registration order, on whichever task fires the event. A failing
//! handler stops the remaining handlers for that event and its error is
//! handed back to the firing code.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{transport::ConnectionId, BoxError, Socks5Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Shutdown,
    Connect,
    Authenticated,
    ReceivedProxyData,
    SentData,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The host started accepting connections.
    Start,
    /// The host stopped accepting connections.
    Shutdown,
    /// The transport accepted a new connection.
    Connect { id: ConnectionId },
    /// A peer completed method negotiation.
    Authenticated { id: ConnectionId },
    /// Bytes from a peer are about to be relayed to its destination.
    ReceivedProxyData { id: ConnectionId, bytes: usize },
    /// Bytes were queued for delivery to a peer.
    SentData { id: ConnectionId, bytes: usize },
    /// The transport reported the connection closed.
    Close { id: ConnectionId },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Start => EventKind::Start,
            Event::Shutdown => EventKind::Shutdown,
            Event::Connect { .. } => EventKind::Connect,
            Event::Authenticated { .. } => EventKind::Authenticated,
            Event::ReceivedProxyData { .. } => EventKind::ReceivedProxyData,
            Event::SentData { .. } => EventKind::SentData,
            Event::Close { .. } => EventKind::Close,
        }
    }
}

type Handler = Arc<dyn Fn(&Event) -> Result<(), BoxError> + Send + Sync + 'static>;

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, after any handler already registered.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.entry(kind).or_default().push(Arc::new(handler));
    }

    pub fn fire(&self, event: Event) -> crate::Result<()> {
        // Snapshot so handlers may register further handlers without deadlocking
        let handlers = {
            let handlers = self
                .handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match handlers.get(&event.kind()) {
                Some(list) => list.clone(),
                None => return Ok(()),
            }
        };

        for handler in handlers {
            handler(&event).map_err(Socks5Error::Handler)?;
        }
        Ok(())
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            bus.on(EventKind::Authenticated, move |_| {
                seen.lock().unwrap().push(tag);
                Ok(())
            });
        }

        bus.fire(Event::Authenticated { id: 7 }).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn only_matching_kind_is_invoked() {
        let bus = EventBus::new();
        let closes = Arc::new(Mutex::new(Vec::new()));
        {
            let closes = Arc::clone(&closes);
            bus.on(EventKind::Close, move |event| {
                if let Event::Close { id } = event {
                    closes.lock().unwrap().push(*id);
                }
                Ok(())
            });
        }

        bus.fire(Event::Start).unwrap();
        bus.fire(Event::SentData { id: 1, bytes: 2 }).unwrap();
        bus.fire(Event::Close { id: 3 }).unwrap();

        assert_eq!(*closes.lock().unwrap(), vec![3]);
    }

    #[test]
    fn firing_without_handlers_is_a_no_op() {
        let bus = EventBus::new();
        assert!(bus.fire(Event::Shutdown).is_ok());
        assert_eq!(bus.handler_count(EventKind::Shutdown), 0);
    }

    #[test]
    fn failing_handler_stops_the_chain() {
        let bus = EventBus::new();
        let reached = Arc::new(Mutex::new(false));

        bus.on(EventKind::Start, |_| Err("boom".into()));
        {
            let reached = Arc::clone(&reached);
            bus.on(EventKind::Start, move |_| {
                *reached.lock().unwrap() = true;
                Ok(())
            });
        }

        let err = bus.fire(Event::Start).unwrap_err();
        assert!(matches!(err, Socks5Error::Handler(_)));
        assert!(!*reached.lock().unwrap());
        assert_eq!(bus.handler_count(EventKind::Start), 2);
    }

    #[test]
    fn handler_may_register_another_handler() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.on(EventKind::Start, move |_| {
            inner.on(EventKind::Shutdown, |_| Ok(()));
            Ok(())
        });

        bus.fire(Event::Start).unwrap();
        assert_eq!(bus.handler_count(EventKind::Shutdown), 1);
    }
}
