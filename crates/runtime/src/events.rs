//! Per-object listener tables and subscription reference counting.
//!
//! Every remote object owns an [`EventEmitter`]: a table from event name to
//! the ordered list of local listeners. The number of listeners for a name is
//! its subscription reference count. The first listener for a name and the
//! removal of the last one are reported as a [`Transition`] while the table
//! lock is still held, so the caller can issue the matching remote
//! emit-control request in the same order the transitions happened.
//!
//! [`EventSubscription`] is the RAII form of a listener registration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::channel_owner::ChannelOwner;
use crate::codec::RemoteValue;

/// Local notification emitted on an object while it is being disposed.
///
/// Never requested from the server.
pub const CLOSED_EVENT: &str = "closed";

/// Callback invoked with the decoded event payload.
pub type Listener = Arc<dyn Fn(&RemoteValue) + Send + Sync>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one listener registration, unique for the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
	fn next() -> Self {
		Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
	}

	pub fn as_u64(&self) -> u64 {
		self.0
	}
}

/// Change in interest for one event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	/// Count went from 0 to 1.
	Subscribed,
	/// Count went from 1 to 0.
	Unsubscribed,
}

/// Returns true for events produced locally rather than by the server.
pub fn is_local_event(event: &str) -> bool {
	event == CLOSED_EVENT
}

/// Listener table of one object.
#[derive(Default)]
pub struct EventEmitter {
	slots: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
}

impl EventEmitter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a listener; `on_transition` runs under the table lock when
	/// this is the first listener for `event`.
	pub fn add<F>(&self, event: &str, listener: Listener, on_transition: F) -> ListenerId
	where
		F: FnOnce(Transition),
	{
		let id = ListenerId::next();
		let mut slots = self.slots.lock();
		let slot = slots.entry(event.to_string()).or_default();
		slot.push((id, listener));
		if slot.len() == 1 {
			on_transition(Transition::Subscribed);
		}
		id
	}

	/// Removes a listener; `on_transition` runs under the table lock when it
	/// was the last listener for `event`. Returns false if `id` was not registered.
	pub fn remove<F>(&self, event: &str, id: ListenerId, on_transition: F) -> bool
	where
		F: FnOnce(Transition),
	{
		let mut slots = self.slots.lock();
		let Some(slot) = slots.get_mut(event) else {
			return false;
		};
		let Some(pos) = slot.iter().position(|(lid, _)| *lid == id) else {
			return false;
		};
		slot.remove(pos);
		if slot.is_empty() {
			slots.remove(event);
			on_transition(Transition::Unsubscribed);
		}
		true
	}

	/// Invokes every listener for `event` in registration order.
	///
	/// Listeners run outside the table lock and may add or remove listeners,
	/// including themselves. Returns how many listeners were invoked.
	pub fn emit(&self, event: &str, params: &RemoteValue) -> usize {
		let listeners: Vec<Listener> = match self.slots.lock().get(event) {
			Some(slot) => slot.iter().map(|(_, l)| Arc::clone(l)).collect(),
			None => return 0,
		};
		for listener in &listeners {
			listener(params);
		}
		listeners.len()
	}

	/// Current subscription reference count for `event`.
	pub fn listener_count(&self, event: &str) -> usize {
		self.slots.lock().get(event).map_or(0, Vec::len)
	}

	/// Event names with at least one listener.
	pub fn active_events(&self) -> Vec<String> {
		let mut events: Vec<String> = self.slots.lock().keys().cloned().collect();
		events.sort();
		events
	}

	/// Drops every listener without reporting transitions.
	pub fn clear(&self) {
		self.slots.lock().clear();
	}
}

impl std::fmt::Debug for EventEmitter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventEmitter")
			.field("events", &self.active_events())
			.finish()
	}
}

/// A listener registration that is removed when dropped.
///
/// Holds the object weakly, so dropping it after the object was disposed is
/// a no-op.
///
/// # Example
///
/// ```ignore
/// let sub = EventSubscription::new(&page, "console", Arc::new(|msg| println!("{msg:?}")));
/// // Listener is active while `sub` is held...
/// drop(sub);
/// ```
pub struct EventSubscription {
	object: Weak<dyn ChannelOwner>,
	event: String,
	id: Option<ListenerId>,
}

impl EventSubscription {
	/// Registers `listener` for `event` on `object`.
	pub fn new(object: &Arc<dyn ChannelOwner>, event: &str, listener: Listener) -> Self {
		let id = object.on(event, listener);
		Self {
			object: Arc::downgrade(object),
			event: event.to_string(),
			id: Some(id),
		}
	}

	pub fn id(&self) -> Option<ListenerId> {
		self.id
	}

	/// Explicitly removes the listener, equivalent to dropping the subscription.
	pub fn unsubscribe(mut self) {
		self.release();
	}

	fn release(&mut self) {
		if let (Some(id), Some(object)) = (self.id.take(), self.object.upgrade()) {
			object.off(&self.event, id);
		}
	}
}

impl Drop for EventSubscription {
	fn drop(&mut self) {
		self.release();
	}
}

impl std::fmt::Debug for EventSubscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventSubscription")
			.field("event", &self.event)
			.field("active", &self.id.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;

	fn counter() -> (Arc<AtomicUsize>, Listener) {
		let hits = Arc::new(AtomicUsize::new(0));
		let h = Arc::clone(&hits);
		(
			hits,
			Arc::new(move |_: &RemoteValue| {
				h.fetch_add(1, Ordering::SeqCst);
			}),
		)
	}

	#[test]
	fn transitions_only_on_zero_one_boundaries() {
		let emitter = EventEmitter::new();
		let mut transitions = Vec::new();

		let (_, l1) = counter();
		let (_, l2) = counter();
		let a = emitter.add("console", l1, |t| transitions.push(t));
		let b = emitter.add("console", l2, |t| transitions.push(t));
		assert_eq!(transitions, vec![Transition::Subscribed]);
		assert_eq!(emitter.listener_count("console"), 2);

		assert!(emitter.remove("console", a, |t| transitions.push(t)));
		assert_eq!(transitions, vec![Transition::Subscribed]);
		assert!(emitter.remove("console", b, |t| transitions.push(t)));
		assert_eq!(transitions, vec![Transition::Subscribed, Transition::Unsubscribed]);
		assert_eq!(emitter.listener_count("console"), 0);
	}

	#[test]
	fn removing_unknown_listener_is_reported() {
		let emitter = EventEmitter::new();
		let (_, l) = counter();
		let id = emitter.add("request", l, |_| {});
		assert!(!emitter.remove("response", id, |_| panic!("no transition expected")));
		assert!(emitter.remove("request", id, |_| {}));
		assert!(!emitter.remove("request", id, |_| panic!("no transition expected")));
	}

	#[test]
	fn emit_reaches_listeners_in_order() {
		let emitter = EventEmitter::new();
		let order = Arc::new(Mutex::new(Vec::new()));
		for n in 0..3 {
			let order = Arc::clone(&order);
			emitter.add("tick", Arc::new(move |_: &RemoteValue| order.lock().push(n)), |_| {});
		}
		assert_eq!(emitter.emit("tick", &RemoteValue::Null), 3);
		assert_eq!(*order.lock(), vec![0, 1, 2]);
		assert_eq!(emitter.emit("other", &RemoteValue::Null), 0);
	}

	#[test]
	fn listener_may_remove_itself_during_emit() {
		let emitter = Arc::new(EventEmitter::new());
		let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
		let (hits, _) = counter();

		let e = Arc::clone(&emitter);
		let s = Arc::clone(&slot);
		let h = Arc::clone(&hits);
		let id = emitter.add(
			"once",
			Arc::new(move |_: &RemoteValue| {
				h.fetch_add(1, Ordering::SeqCst);
				if let Some(id) = s.lock().take() {
					e.remove("once", id, |_| {});
				}
			}),
			|_| {},
		);
		*slot.lock() = Some(id);

		emitter.emit("once", &RemoteValue::Null);
		emitter.emit("once", &RemoteValue::Null);
		assert_eq!(hits.load(Ordering::SeqCst), 1);
		assert!(emitter.active_events().is_empty());
	}

	#[test]
	fn closed_is_local_only() {
		assert!(is_local_event(CLOSED_EVENT));
		assert!(!is_local_event("close"));
	}
}
