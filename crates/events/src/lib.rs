//! Named synchronous events with ordered listeners.
//!
//! An [`EventHub`] lazily creates one [`Event`] per case-insensitive name. Triggering
//! an event calls its listeners in registration order on the caller's thread. A
//! listener error stops the fan-out and is returned to whoever triggered the event.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

/// Error produced by a listener; propagated unchanged to the trigger site.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Callback<A> = Arc<dyn Fn(&A, &Event<A>) -> Result<(), ListenerError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("Invalid event name: {0:?}")]
    InvalidName(String),
}

/// Event names are one or more of `[A-Za-z0-9_.-]`.
pub const fn is_valid_name(name: &str) -> bool {
    let mut rest = name.as_bytes();
    if rest.is_empty() {
        return false;
    }
    while let [b, tail @ ..] = rest {
        if !(b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-' || *b == b'.') {
            return false;
        }
        rest = tail;
    }
    true
}

/// A validated event name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventName(Cow<'static, str>);

impl EventName {
    pub fn new(name: &str) -> Result<Self, EventError> {
        if is_valid_name(name) {
            Ok(Self(Cow::Owned(name.to_owned())))
        } else {
            Err(EventError::InvalidName(name.to_owned()))
        }
    }

    /// Compile-time checked name for well-known events.
    pub const fn from_static(name: &'static str) -> Self {
        assert!(is_valid_name(name), "invalid event name");
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn key(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named event and its listeners.
pub struct Event<A> {
    name: String,
    listeners: RwLock<Vec<Callback<A>>>,
}

impl<A> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl<A> Event<A> {
    fn new(name: String) -> Self {
        Self {
            name,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Lower-cased event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a listener. The same closure registered twice fires twice.
    pub fn listen<F>(&self, callback: F) -> &Self
    where
        F: Fn(&A, &Event<A>) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(callback));
        self
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Call every listener with `args` and this event, in registration order.
    ///
    /// Returns the number of listeners invoked. Listeners run without any lock held,
    /// so they may register further listeners or trigger other events.
    pub fn trigger(&self, args: &A) -> Result<usize, ListenerError> {
        let listeners: Vec<Callback<A>> = {
            let guard = self.listeners.read();
            if guard.is_empty() {
                return Ok(0);
            }
            guard.clone()
        };

        trace!(event = %self.name, listeners = listeners.len(), "triggering event");
        for listener in &listeners {
            listener(args, self)?;
        }
        Ok(listeners.len())
    }
}

/// Registry of named events.
pub struct EventHub<A> {
    events: RwLock<HashMap<String, Arc<Event<A>>>>,
}

impl<A> fmt::Debug for EventHub<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events = self.events.read();
        f.debug_struct("EventHub")
            .field("events", &events.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<A> Default for EventHub<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> EventHub<A> {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
        }
    }

    /// Look up or create the event called `name` (case-insensitive).
    pub fn on(&self, name: &str) -> Result<Arc<Event<A>>, EventError> {
        EventName::new(name).map(|name| self.event(&name))
    }

    /// Infallible [`on`](Self::on) for an already validated name.
    pub fn event(&self, name: &EventName) -> Arc<Event<A>> {
        let key = name.key();

        if let Some(event) = self.events.read().get(&key) {
            return Arc::clone(event);
        }

        let mut events = self.events.write();
        let event = events
            .entry(key)
            .or_insert_with_key(|key| Arc::new(Event::new(key.clone())));
        Arc::clone(event)
    }

    pub fn has(&self, name: &str) -> bool {
        self.events.read().contains_key(&name.to_ascii_lowercase())
    }

    /// Drop `event` from the hub. Existing handles keep working but a later
    /// [`on`](Self::on) with the same name creates a fresh event.
    pub fn clear(&self, event: &Event<A>) {
        self.events.write().remove(event.name());
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_on_is_idempotent_and_case_insensitive() {
        let hub = EventHub::<u32>::new();
        let a = hub.on("onPeerConnect").unwrap();
        let b = hub.on("ONPEERCONNECT").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "onpeerconnect");
        assert!(hub.has("OnPeerConnect"));
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let hub = EventHub::<u32>::new();

        assert_matches!(hub.on(""), Err(EventError::InvalidName(_)));
        assert_matches!(hub.on("peer connect"), Err(EventError::InvalidName(_)));
        assert_matches!(hub.on("peer/connect"), Err(EventError::InvalidName(_)));
        assert!(hub.on("peer-connect.v1_2").is_ok());
        assert!(!hub.has("peer connect"));
    }

    #[test]
    fn test_static_name_shares_event_with_dynamic_lookup() {
        const READY: EventName = EventName::from_static("onReady");
        let hub = EventHub::<u32>::new();

        let by_const = hub.event(&READY);
        let by_str = hub.on("onready").unwrap();
        assert!(Arc::ptr_eq(&by_const, &by_str));
        assert_eq!(READY.to_string(), "onReady");
    }

    #[test]
    fn test_trigger_without_listeners_returns_zero() {
        let hub = EventHub::<u32>::new();
        let event = hub.on("idle").unwrap();

        assert_eq!(event.trigger(&7).unwrap(), 0);
    }

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let hub = EventHub::<u32>::new();
        let event = hub.on("onPeerConnect").unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for id in 1..=3 {
            let calls = calls.clone();
            event.listen(move |arg: &u32, ev: &Event<u32>| {
                calls.lock().push((id, *arg, ev.name().to_owned()));
                Ok(())
            });
        }

        assert_eq!(event.trigger(&42).unwrap(), 3);
        assert_eq!(
            *calls.lock(),
            vec![
                (1, 42, "onpeerconnect".to_owned()),
                (2, 42, "onpeerconnect".to_owned()),
                (3, 42, "onpeerconnect".to_owned()),
            ]
        );
    }

    #[test]
    fn test_same_listener_twice_fires_twice() {
        let hub = EventHub::<()>::new();
        let event = hub.on("tick").unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = {
            let count = count.clone();
            move |_: &(), _: &Event<()>| -> Result<(), ListenerError> {
                count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        };
        event.listen(counter.clone()).listen(counter);

        assert_eq!(event.trigger(&()).unwrap(), 2);
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_listener_error_stops_fan_out() {
        let hub = EventHub::<()>::new();
        let event = hub.on("fragile").unwrap();
        let reached = Arc::new(AtomicUsize::new(0));

        let r = reached.clone();
        event
            .listen(|_, _| Err("listener exploded".into()))
            .listen(move |_, _| {
                r.fetch_add(1, Ordering::Relaxed);
                Ok(())
            });

        let err = event.trigger(&()).unwrap_err();
        assert_eq!(err.to_string(), "listener exploded");
        assert_eq!(reached.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_listener_may_reenter_hub() {
        let hub = Arc::new(EventHub::<()>::new());
        let outer = hub.on("outer").unwrap();
        let inner_fired = Arc::new(AtomicUsize::new(0));

        let h = hub.clone();
        let fired = inner_fired.clone();
        outer.listen(move |_, _| {
            let fired = fired.clone();
            h.on("inner")?.listen(move |_, _| {
                fired.fetch_add(1, Ordering::Relaxed);
                Ok(())
            });
            h.on("inner")?.trigger(&())?;
            Ok(())
        });

        assert_eq!(outer.trigger(&()).unwrap(), 1);
        assert_eq!(inner_fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_clear_forgets_event() {
        let hub = EventHub::<()>::new();
        let first = hub.on("gone").unwrap();
        first.listen(|_, _| Ok(()));

        hub.clear(&first);
        assert!(!hub.has("gone"));

        let second = hub.on("gone").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.listener_count(), 0);
    }
}
