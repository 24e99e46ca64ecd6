//! Listener registry for session events.
//!
//! A [`SessionEventBus`] calls listeners in registration order, synchronously. A session
//! puts its bus behind a dispatcher that runs listeners with no lock held, so a listener
//! may call back into the session. Events raised while a delivery is running are queued
//! and delivered by the thread already delivering.

use crate::event::{SessionEvent, TimedEvent};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::mem;
use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

/// Trait for reacting to session events.
pub trait SessionListener: Send {
    fn on_event(&mut self, event: &SessionEvent);
}

impl<F> SessionListener for F
where
    F: FnMut(&SessionEvent) + Send,
{
    fn on_event(&mut self, event: &SessionEvent) {
        self(event)
    }
}

/// Determines which kinds of events a listener wants to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFilter {
    All,
    /// `DataReceived` only.
    DataOnly,
    /// `Inserted` / `Removed` only.
    LifecycleOnly,
    Custom(fn(&SessionEvent) -> bool),
}

impl EventFilter {
    pub fn accepts(&self, event: &SessionEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::DataOnly => matches!(event, SessionEvent::DataReceived(_)),
            EventFilter::LifecycleOnly => event.is_lifecycle(),
            EventFilter::Custom(f) => f(event),
        }
    }
}

/// Handle returned by [`SessionEventBus::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct ListenerEntry {
    listener: Box<dyn SessionListener>,
    enabled: bool,
    filter: EventFilter,
}

#[derive(Default)]
pub struct SessionEventBus {
    next_id: u64,
    listeners: BTreeMap<u64, ListenerEntry>,
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener with a filter.
    pub fn add_listener(
        &mut self,
        listener: impl SessionListener + 'static,
        filter: EventFilter,
    ) -> ListenerId {
        let id = self.next_id;
        self.listeners.insert(
            id,
            ListenerEntry {
                listener: Box::new(listener),
                enabled: true,
                filter,
            },
        );
        self.next_id += 1;
        ListenerId(id)
    }

    /// Enables a previously registered listener.
    pub fn enable(&mut self, id: ListenerId) {
        if let Some(entry) = self.listeners.get_mut(&id.0) {
            entry.enabled = true;
        }
    }

    /// Disables (mutes) a listener without removing it.
    pub fn disable(&mut self, id: ListenerId) {
        if let Some(entry) = self.listeners.get_mut(&id.0) {
            entry.enabled = false;
        }
    }

    /// Unregisters a listener; returns whether it existed.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id.0).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Emits one event to all active and matching listeners.
    pub fn emit(&mut self, event: &SessionEvent) {
        for entry in self.listeners.values_mut() {
            if entry.enabled && entry.filter.accepts(event) {
                entry.listener.on_event(event);
            }
        }
    }

    /// Emits a batch of events in order.
    pub fn emit_all(&mut self, events: &[SessionEvent]) {
        for event in events {
            self.emit(event);
        }
    }
}

struct DispatchState {
    bus: SessionEventBus,
    /// Thread currently running listeners.
    delivering: Option<ThreadId>,
    pending: VecDeque<SessionEvent>,
    /// Listeners moved out of `bus` for the event being delivered.
    in_flight: BTreeSet<u64>,
    /// In-flight listeners unregistered during delivery.
    removed: BTreeSet<u64>,
}

impl DispatchState {
    /// Put listeners back after a delivery, dropping the ones removed meanwhile.
    fn restore(&mut self, mut taken: BTreeMap<u64, ListenerEntry>) {
        for id in mem::take(&mut self.removed) {
            taken.remove(&id);
        }
        self.in_flight.clear();
        taken.append(&mut self.bus.listeners);
        self.bus.listeners = taken;
    }
}

/// Thread-safe front of a [`SessionEventBus`].
///
/// One thread delivers at a time, with no lock held while listeners run. Events raised
/// while a delivery is running (by a listener, or by another thread) are queued and
/// delivered by the running loop, in order, before it returns.
pub(crate) struct EventDispatcher {
    state: Mutex<DispatchState>,
}

/// Listeners taken out for one delivery loop; returned to the bus on drop, unwinding
/// included.
struct DeliveryRound<'a> {
    dispatcher: &'a EventDispatcher,
    taken: BTreeMap<u64, ListenerEntry>,
    finished: bool,
}

impl Drop for DeliveryRound<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut st = self.dispatcher.lock();
        st.restore(mem::take(&mut self.taken));
        st.pending.clear();
        st.delivering = None;
    }
}

impl EventDispatcher {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(DispatchState {
                bus: SessionEventBus::new(),
                delivering: None,
                pending: VecDeque::new(),
                in_flight: BTreeSet::new(),
                removed: BTreeSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add_listener(
        &self,
        listener: impl SessionListener + 'static,
        filter: EventFilter,
    ) -> ListenerId {
        self.lock().bus.add_listener(listener, filter)
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        let mut st = self.lock();
        if st.bus.remove_listener(id) {
            return true;
        }
        st.in_flight.contains(&id.0) && st.removed.insert(id.0)
    }

    pub(crate) fn emit(&self, events: &[SessionEvent]) {
        if events.is_empty() {
            return;
        }
        {
            let mut st = self.lock();
            st.pending.extend(events.iter().cloned());
            if st.delivering.is_some() {
                return;
            }
            st.delivering = Some(thread::current().id());
        }

        let mut round = DeliveryRound {
            dispatcher: self,
            taken: BTreeMap::new(),
            finished: false,
        };
        loop {
            let event = {
                let mut st = self.lock();
                st.restore(mem::take(&mut round.taken));
                let Some(event) = st.pending.pop_front() else {
                    st.delivering = None;
                    round.finished = true;
                    return;
                };
                round.taken = mem::take(&mut st.bus.listeners);
                st.in_flight = round.taken.keys().copied().collect();
                event
            };
            for entry in round.taken.values_mut() {
                if entry.enabled && entry.filter.accepts(&event) {
                    entry.listener.on_event(&event);
                }
            }
        }
    }
}

/// Forwards events into an `mpsc` channel, timestamped.
///
/// Sends to a dropped receiver are ignored.
pub struct ChannelListener {
    tx: Sender<TimedEvent>,
}

impl ChannelListener {
    pub fn new(tx: Sender<TimedEvent>) -> Self {
        Self { tx }
    }
}

impl SessionListener for ChannelListener {
    fn on_event(&mut self, event: &SessionEvent) {
        let _ = self.tx.send(TimedEvent {
            at: Instant::now(),
            event: event.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Report;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl SessionListener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |e: &SessionEvent| {
            sink.lock().unwrap().push(format!("{e:?}"))
        })
    }

    #[test]
    fn filters_and_mute() {
        let mut bus = SessionEventBus::new();
        let (all, l1) = recorder();
        let (data, l2) = recorder();
        bus.add_listener(l1, EventFilter::All);
        let id = bus.add_listener(l2, EventFilter::DataOnly);

        bus.emit_all(&[
            SessionEvent::Inserted,
            SessionEvent::DataReceived(Report::new(0, vec![1])),
        ]);
        assert_eq!(all.lock().unwrap().len(), 2);
        assert_eq!(data.lock().unwrap().len(), 1);

        bus.disable(id);
        bus.emit(&SessionEvent::DataReceived(Report::new(0, vec![2])));
        assert_eq!(data.lock().unwrap().len(), 1);
        bus.enable(id);
        bus.emit(&SessionEvent::DataReceived(Report::new(0, vec![3])));
        assert_eq!(data.lock().unwrap().len(), 2);

        assert!(bus.remove_listener(id));
        assert!(!bus.remove_listener(id));
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn registration_order_is_delivery_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut bus = SessionEventBus::new();
        for n in 0..3 {
            let order = order.clone();
            bus.add_listener(move |_: &SessionEvent| order.lock().unwrap().push(n), EventFilter::All);
        }
        bus.emit(&SessionEvent::Removed);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn channel_listener_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        let mut bus = SessionEventBus::new();
        bus.add_listener(ChannelListener::new(tx), EventFilter::LifecycleOnly);
        bus.emit(&SessionEvent::ReadTimedOut);
        bus.emit(&SessionEvent::Inserted);
        assert_eq!(rx.try_recv().unwrap().event, SessionEvent::Inserted);
        assert!(rx.try_recv().is_err());
        drop(rx);
        bus.emit(&SessionEvent::Removed);
    }

    #[test]
    fn nested_emit_is_queued_behind_current_event() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (seen, rec) = recorder();
        let inner = dispatcher.clone();
        dispatcher.add_listener(
            move |e: &SessionEvent| {
                if *e == SessionEvent::Inserted {
                    inner.emit(&[SessionEvent::Removed]);
                }
            },
            EventFilter::All,
        );
        dispatcher.add_listener(rec, EventFilter::All);

        dispatcher.emit(&[SessionEvent::Inserted, SessionEvent::ReadTimedOut]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["Inserted", "ReadTimedOut", "Removed"]
        );
    }

    #[test]
    fn listeners_can_register_and_unregister_during_delivery() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (late_seen, late) = recorder();
        let late = Arc::new(Mutex::new(Some(late)));
        let own_id = Arc::new(Mutex::new(None));

        let inner = dispatcher.clone();
        let id_slot = own_id.clone();
        let id = dispatcher.add_listener(
            move |_: &SessionEvent| {
                if let Some(l) = late.lock().unwrap().take() {
                    inner.add_listener(l, EventFilter::All);
                }
                if let Some(id) = id_slot.lock().unwrap().take() {
                    assert!(inner.remove_listener(id));
                }
            },
            EventFilter::All,
        );
        *own_id.lock().unwrap() = Some(id);

        dispatcher.emit(&[SessionEvent::Inserted]);
        dispatcher.emit(&[SessionEvent::Removed]);
        assert_eq!(*late_seen.lock().unwrap(), vec!["Removed"]);
        assert!(!dispatcher.remove_listener(id));
        assert_eq!(dispatcher.lock().bus.len(), 1);
    }

    #[test]
    fn concurrent_emitters_lose_nothing() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (seen, rec) = recorder();
        dispatcher.add_listener(rec, EventFilter::All);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let d = dispatcher.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        d.emit(&[SessionEvent::ReadTimedOut]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(seen.lock().unwrap().len(), 100);
    }
}
