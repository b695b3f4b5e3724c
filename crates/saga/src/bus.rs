//! Event bridge between processes and the outside world.
//!
//! A process needs exactly two capabilities from its environment: register a
//! listener for published events ([`EventSource`]) and publish events of its
//! own (the emit function). [`Io`] bundles both and is shared, unchanged, by
//! every process forked or nested from the same root.
//!
//! [`LocalBus`] is the in-process implementation: listeners are called
//! synchronously, in registration order, for every dispatched event.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::event::Event;

/// Callback invoked for every published event.
pub type Listener = Rc<dyn Fn(&Event)>;

/// Fire-and-forget publish function.
pub type EmitFn = Rc<dyn Fn(Event)>;

/// Something processes can subscribe to.
pub trait EventSource {
    /// Register a listener. Releasing the returned [`Subscription`] must fully
    /// detach it.
    fn subscribe(&self, listener: Listener) -> Subscription;
}

/// Observes every event dispatched on a [`LocalBus`], before any listener.
pub trait EventTap {
    fn on_event(&self, event: &Event);
}

impl<F> EventTap for F
where
    F: Fn(&Event),
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Handle returned by [`EventSource::subscribe`].
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Wrap the action that detaches a listener.
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A subscription with nothing to detach.
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Detach the listener.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// The bus capabilities handed to a process.
#[derive(Clone)]
pub struct Io {
    source: Rc<dyn EventSource>,
    emit: EmitFn,
}

impl Io {
    pub fn new(source: Rc<dyn EventSource>, emit: impl Fn(Event) + 'static) -> Self {
        Self {
            source,
            emit: Rc::new(emit),
        }
    }

    /// Never delivers events and drops everything emitted.
    pub fn detached() -> Self {
        Self {
            source: Rc::new(Detached),
            emit: Rc::new(|_| {}),
        }
    }

    /// Replace the emit function, keeping the event source.
    pub fn with_emit(&self, emit: impl Fn(Event) + 'static) -> Self {
        Self {
            source: Rc::clone(&self.source),
            emit: Rc::new(emit),
        }
    }

    pub fn subscribe(&self, listener: Listener) -> Subscription {
        self.source.subscribe(listener)
    }

    pub fn emit(&self, event: Event) {
        (self.emit)(event)
    }
}

impl fmt::Debug for Io {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Io").finish_non_exhaustive()
    }
}

struct Detached;

impl EventSource for Detached {
    fn subscribe(&self, _listener: Listener) -> Subscription {
        Subscription::noop()
    }
}

/// Single-threaded publish/subscribe channel.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Rc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    listeners: RefCell<Vec<(u64, Listener)>>,
    taps: RefCell<Vec<Rc<dyn EventTap>>>,
    next_id: Cell<u64>,
    trace_events: Cell<bool>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every dispatched event at debug level.
    pub fn set_trace_events(&self, enabled: bool) {
        self.inner.trace_events.set(enabled);
    }

    /// Register an observer that sees every dispatched event.
    pub fn add_tap(&self, tap: Rc<dyn EventTap>) {
        self.inner.taps.borrow_mut().push(tap);
    }

    /// Deliver an event to every tap, then every listener registered at the
    /// time of the call. Listeners added or released during delivery do not
    /// affect this dispatch.
    pub fn dispatch(&self, event: Event) {
        if self.inner.trace_events.get() {
            debug!(kind = %event.kind, payload = %event.payload, "dispatching event");
        }

        let taps = self.inner.taps.borrow().clone();
        for tap in &taps {
            tap.on_event(&event);
        }

        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        trace!(kind = %event.kind, listeners = listeners.len(), "delivering event");
        for listener in &listeners {
            listener(&event);
        }
    }

    /// Number of currently attached listeners.
    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Capabilities for a process whose emits dispatch back into this bus.
    pub fn io(&self) -> Io {
        let bus = self.clone();
        Io::new(Rc::new(self.clone()), move |event| bus.dispatch(event))
    }
}

impl EventSource for LocalBus {
    fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.listeners.borrow_mut().push((id, listener));

        let inner: Weak<BusInner> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.borrow_mut().retain(|(other, _)| *other != id);
            }
        })
    }
}

impl fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, Listener) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let listener: Listener = Rc::new(move |event: &Event| {
            sink.borrow_mut().push(event.kind.clone());
        });
        (seen, listener)
    }

    #[test]
    fn test_dispatch_reaches_listeners_in_order() {
        let bus = LocalBus::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for name in ["first", "second"] {
            let order = Rc::clone(&order);
            let _ = bus.subscribe(Rc::new(move |_: &Event| order.borrow_mut().push(name)));
        }

        bus.dispatch(Event::new("go"));
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_release_detaches_listener() {
        let bus = LocalBus::new();
        let (seen, listener) = recorder();

        let subscription = bus.subscribe(listener);
        bus.dispatch(Event::new("a"));
        subscription.release();
        bus.dispatch(Event::new("b"));

        assert_eq!(*seen.borrow(), vec!["a"]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_release_during_dispatch_is_safe() {
        let bus = LocalBus::new();
        let (seen, listener) = recorder();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let releaser = Rc::clone(&slot);
        let _first = bus.subscribe(Rc::new(move |_: &Event| {
            if let Some(subscription) = releaser.borrow_mut().take() {
                subscription.release();
            }
        }));
        *slot.borrow_mut() = Some(bus.subscribe(listener));

        // Snapshot taken before the release, so the second listener still sees "a".
        bus.dispatch(Event::new("a"));
        bus.dispatch(Event::new("b"));

        assert_eq!(*seen.borrow(), vec!["a"]);
    }

    #[test]
    fn test_taps_run_before_listeners() {
        let bus = LocalBus::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let tapped = Rc::clone(&order);
        bus.add_tap(Rc::new(move |e: &Event| {
            tapped.borrow_mut().push(format!("tap:{}", e.kind))
        }));
        let listened = Rc::clone(&order);
        let _ = bus.subscribe(Rc::new(move |e: &Event| {
            listened.borrow_mut().push(format!("listener:{}", e.kind))
        }));

        bus.dispatch(Event::new("x"));
        assert_eq!(*order.borrow(), vec!["tap:x", "listener:x"]);
    }

    #[test]
    fn test_io_emits_back_into_bus() {
        let bus = LocalBus::new();
        let (seen, listener) = recorder();
        let _ = bus.subscribe(listener);

        bus.io().emit(Event::new("looped"));
        assert_eq!(*seen.borrow(), vec!["looped"]);
    }

    #[test]
    fn test_detached_io_ignores_everything() {
        let io = Io::detached();
        let (seen, listener) = recorder();

        io.subscribe(listener).release();
        io.emit(Event::new("lost"));
        assert!(seen.borrow().is_empty());
    }
}
