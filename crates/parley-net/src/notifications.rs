//! Routing of unsolicited server pushes.
//!
//! The [`NotificationRouter`] maps [`NotificationKind`] values to subscribed
//! [`NotificationHandler`]s. Notifications never touch the request queue: the
//! worker hands every `Notification` frame straight to the router, whether or
//! not a request is in flight.

use std::collections::HashMap;

use crate::channel::{Event, EventSink};
use crate::messages::{Notification, NotificationKind};

/// A subscriber to one notification kind.
pub trait NotificationHandler: Send + Sync {
    /// React to a notification, optionally emitting events.
    fn handle(&self, notification: &Notification, events: &EventSink);
}

impl<F> NotificationHandler for F
where
    F: Fn(&Notification, &EventSink) + Send + Sync,
{
    fn handle(&self, notification: &Notification, events: &EventSink) {
        self(notification, events);
    }
}

/// Routes notifications to handlers by [`NotificationKind`].
pub struct NotificationRouter {
    handlers: HashMap<NotificationKind, Vec<Box<dyn NotificationHandler>>>,
}

impl NotificationRouter {
    /// Create a router with no subscribers.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Router used by the engine: `MessagesUpdated` becomes
    /// [`Event::ChatHasBeenUpdated`].
    pub fn with_defaults() -> Self {
        let mut router = Self::new();
        router.subscribe(
            NotificationKind::MessagesUpdated,
            |_: &Notification, events: &EventSink| events.emit(Event::ChatHasBeenUpdated),
        );
        router
    }

    /// Add a handler for `kind`. Handlers run in subscription order.
    pub fn subscribe<H: NotificationHandler + 'static>(
        &mut self,
        kind: NotificationKind,
        handler: H,
    ) {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Deliver a notification to every handler of its kind.
    ///
    /// Returns the number of handlers that ran; `0` means it was dropped.
    pub fn route(&self, notification: &Notification, events: &EventSink) -> usize {
        let kind = notification.notification_kind;
        match self.handlers.get(&kind) {
            Some(handlers) if !handlers.is_empty() => {
                for handler in handlers {
                    handler.handle(notification, events);
                }
                handlers.len()
            }
            _ => {
                tracing::warn!(?kind, "No subscriber for notification, dropping");
                0
            }
        }
    }

    /// Return an iterator over kinds with at least one subscriber.
    pub fn registered_kinds(&self) -> impl Iterator<Item = &NotificationKind> {
        self.handlers
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(kind, _)| kind)
    }
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::event_channel;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn messages_updated() -> Notification {
        Notification {
            notification_kind: NotificationKind::MessagesUpdated,
        }
    }

    #[test]
    fn test_default_router_emits_refresh_event() {
        let (sink, mut rx) = event_channel();
        let router = NotificationRouter::with_defaults();

        assert_eq!(router.route(&messages_updated(), &sink), 1);
        assert_eq!(rx.try_recv().unwrap(), Event::ChatHasBeenUpdated);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribed_kind_dropped() {
        let (sink, mut rx) = event_channel();
        let router = NotificationRouter::new();

        assert_eq!(router.route(&messages_updated(), &sink), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_multiple_subscribers_all_run_in_order() {
        let (sink, _rx) = event_channel();
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut router = NotificationRouter::new();
        for id in 0..3 {
            let calls = Arc::clone(&calls);
            router.subscribe(
                NotificationKind::MessagesUpdated,
                move |_: &Notification, _: &EventSink| calls.lock().unwrap().push(id),
            );
        }

        assert_eq!(router.route(&messages_updated(), &sink), 3);
        assert_eq!(*calls.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_handler_sees_payload() {
        let (sink, _rx) = event_channel();
        let hits = Arc::new(AtomicU32::new(0));
        let hits_clone = Arc::clone(&hits);

        let mut router = NotificationRouter::new();
        router.subscribe(
            NotificationKind::MessagesUpdated,
            move |n: &Notification, _: &EventSink| {
                assert_eq!(n.notification_kind, NotificationKind::MessagesUpdated);
                hits_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        router.route(&messages_updated(), &sink);
        router.route(&messages_updated(), &sink);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_registered_kinds() {
        let router = NotificationRouter::with_defaults();
        let kinds: Vec<_> = router.registered_kinds().copied().collect();
        assert_eq!(kinds, vec![NotificationKind::MessagesUpdated]);
        assert_eq!(NotificationRouter::new().registered_kinds().count(), 0);
    }
}
