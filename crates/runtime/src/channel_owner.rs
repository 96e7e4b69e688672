//! ChannelOwner - Base trait for all remote objects.
//!
//! Every client-side proxy for a server-side object implements ChannelOwner to:
//! - Represent the remote object by guid
//! - Sit in the connection's object tree (parent and children are looked up
//!   there, never stored as pointers on the object)
//! - Receive protocol events and re-emit them to local listeners
//! - Communicate via a Channel proxy

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use downcast_rs::{DowncastSync, impl_downcast};
use pw_wire::{UPDATE_SUBSCRIPTION_METHOD, UpdateSubscriptionParams};
use serde_json::Value;

use crate::channel::Channel;
use crate::codec::RemoteValue;
use crate::connection::ConnectionLike;
use crate::events::{CLOSED_EVENT, EventEmitter, Listener, ListenerId, Transition, is_local_event};
use crate::timeout::TimeoutSettings;

/// Private module for the sealed trait pattern.
pub mod private {
	/// Marker trait that seals `ChannelOwner`.
	pub trait Sealed {}
}

/// Reason why an object was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeReason {
	/// The server closed the object, or its parent was disposed.
	Closed,
	/// The server garbage collected the object.
	GarbageCollected,
	/// The session ended and the whole tree was torn down.
	SessionTerminated,
}

impl DisposeReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			DisposeReason::Closed => "closed",
			DisposeReason::GarbageCollected => "gc",
			DisposeReason::SessionTerminated => "terminated",
		}
	}

	fn to_u8(self) -> u8 {
		match self {
			DisposeReason::Closed => 1,
			DisposeReason::GarbageCollected => 2,
			DisposeReason::SessionTerminated => 3,
		}
	}

	fn from_u8(raw: u8) -> Option<Self> {
		match raw {
			1 => Some(DisposeReason::Closed),
			2 => Some(DisposeReason::GarbageCollected),
			3 => Some(DisposeReason::SessionTerminated),
			_ => None,
		}
	}
}

/// Parent can be either another ChannelOwner or the root Connection.
pub enum ParentOrConnection {
	Parent(Arc<dyn ChannelOwner>),
	Connection(Arc<dyn ConnectionLike>),
}

/// Base trait for all remote objects.
///
/// Implementors embed a [`ChannelOwnerImpl`] and return it from
/// [`base`](Self::base); everything else has a default that delegates to it.
/// Override [`on_event`](Self::on_event) or [`on_dispose`](Self::on_dispose)
/// to react to protocol traffic before local listeners see it.
pub trait ChannelOwner: private::Sealed + DowncastSync {
	/// Returns the embedded base implementation.
	fn base(&self) -> &ChannelOwnerImpl;

	/// Returns the unique guid for this object.
	fn guid(&self) -> &str {
		self.base().guid()
	}

	/// Returns the protocol type name (e.g., "Browser", "Page").
	fn type_name(&self) -> &str {
		self.base().type_name()
	}

	/// Returns the parent object, if any.
	fn parent(&self) -> Option<Arc<dyn ChannelOwner>> {
		self.base().connection().parent_of(self.guid())
	}

	/// Returns the live children, in creation order.
	fn children(&self) -> Vec<Arc<dyn ChannelOwner>> {
		self.base().connection().children_of(self.guid())
	}

	/// Returns the connection this object belongs to.
	fn connection(&self) -> Arc<dyn ConnectionLike> {
		self.base().connection()
	}

	/// Returns the raw initializer JSON from the server.
	fn initializer(&self) -> &Value {
		self.base().initializer()
	}

	/// Returns the channel for RPC communication.
	fn channel(&self) -> &Channel {
		self.base().channel()
	}

	/// Returns this object's timeout defaults.
	fn timeouts(&self) -> &Arc<TimeoutSettings> {
		self.base().timeouts()
	}

	/// Registers a local listener for `event`.
	fn on(&self, event: &str, listener: Listener) -> ListenerId {
		self.base().on(event, listener)
	}

	/// Removes a listener registered with [`on`](Self::on).
	fn off(&self, event: &str, id: ListenerId) -> bool {
		self.base().off(event, id)
	}

	/// Handles a protocol event before it reaches local listeners.
	fn on_event(&self, _method: &str, _params: &RemoteValue) {}

	/// Runs once when the object is disposed, before the `closed` notification.
	fn on_dispose(&self, _reason: DisposeReason) {}

	/// Returns true once the object has been disposed.
	fn is_disposed(&self) -> bool {
		self.base().is_disposed()
	}

	/// Returns true if this object was garbage collected.
	fn was_collected(&self) -> bool {
		self.base().was_collected()
	}
}

impl_downcast!(sync ChannelOwner);

/// Base implementation of ChannelOwner that can be embedded in protocol objects.
pub struct ChannelOwnerImpl {
	guid: Arc<str>,
	type_name: String,
	connection: Arc<dyn ConnectionLike>,
	channel: Channel,
	initializer: Value,
	events: EventEmitter,
	timeouts: Arc<TimeoutSettings>,
	disposed: AtomicBool,
	dispose_reason: AtomicU8,
}

impl ChannelOwnerImpl {
	/// Creates a new ChannelOwner base implementation.
	///
	/// Timeout defaults inherit from the parent, or from the session root when
	/// the parent is the connection itself.
	pub fn new(parent: ParentOrConnection, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		let (connection, timeouts) = match parent {
			ParentOrConnection::Parent(p) => {
				let timeouts = TimeoutSettings::child(p.timeouts());
				(p.connection(), timeouts)
			}
			ParentOrConnection::Connection(c) => {
				let timeouts = TimeoutSettings::child(&c.timeouts());
				(c, timeouts)
			}
		};

		let channel = Channel::new(
			Arc::clone(&guid),
			type_name.clone(),
			Arc::clone(&connection),
			Arc::clone(&timeouts),
		);

		Self {
			guid,
			type_name,
			connection,
			channel,
			initializer,
			events: EventEmitter::new(),
			timeouts,
			disposed: AtomicBool::new(false),
			dispose_reason: AtomicU8::new(0),
		}
	}

	pub fn guid(&self) -> &str {
		&self.guid
	}

	pub fn type_name(&self) -> &str {
		&self.type_name
	}

	pub fn connection(&self) -> Arc<dyn ConnectionLike> {
		Arc::clone(&self.connection)
	}

	pub fn initializer(&self) -> &Value {
		&self.initializer
	}

	pub fn channel(&self) -> &Channel {
		&self.channel
	}

	pub fn events(&self) -> &EventEmitter {
		&self.events
	}

	pub fn timeouts(&self) -> &Arc<TimeoutSettings> {
		&self.timeouts
	}

	/// Registers a listener, asking the server to emit `event` if this is the
	/// first one.
	pub fn on(&self, event: &str, listener: Listener) -> ListenerId {
		self.events
			.add(event, listener, |transition| self.update_subscription(event, transition))
	}

	/// Removes a listener, telling the server to stop emitting `event` if it
	/// was the last one. The stop request is fire-and-forget.
	pub fn off(&self, event: &str, id: ListenerId) -> bool {
		self.events
			.remove(event, id, |transition| self.update_subscription(event, transition))
	}

	/// Delivers `params` to every local listener of `event`.
	pub fn emit(&self, event: &str, params: &RemoteValue) -> usize {
		self.events.emit(event, params)
	}

	fn update_subscription(&self, event: &str, transition: Transition) {
		if is_local_event(event)
			|| self.is_disposed()
			|| self.connection.is_closed()
			|| !self.connection.config().subscription_control
		{
			return;
		}
		let enabled = transition == Transition::Subscribed;
		tracing::debug!(guid = %self.guid, event, enabled, "Updating event subscription");
		let params = UpdateSubscriptionParams {
			event: event.to_string(),
			enabled,
		};
		match serde_json::to_value(params) {
			Ok(params) => self.channel.send_detached(UPDATE_SUBSCRIPTION_METHOD, params),
			Err(e) => tracing::warn!(guid = %self.guid, event, error = %e, "Failed to encode subscription update"),
		}
	}

	/// Marks the object disposed. Returns false if it already was.
	pub(crate) fn mark_disposed(&self, reason: DisposeReason) -> bool {
		if self.disposed.swap(true, Ordering::SeqCst) {
			return false;
		}
		self.dispose_reason.store(reason.to_u8(), Ordering::SeqCst);
		true
	}

	/// Emits the local `closed` notification and drops every listener.
	pub(crate) fn finish_dispose(&self, reason: DisposeReason) {
		let payload = RemoteValue::object([("reason", RemoteValue::from(reason.as_str()))]);
		self.events.emit(CLOSED_EVENT, &payload);
		self.events.clear();
	}

	pub fn is_disposed(&self) -> bool {
		self.disposed.load(Ordering::SeqCst)
	}

	/// Why the object was disposed, if it was.
	pub fn dispose_reason(&self) -> Option<DisposeReason> {
		DisposeReason::from_u8(self.dispose_reason.load(Ordering::SeqCst))
	}

	pub fn was_collected(&self) -> bool {
		self.dispose_reason() == Some(DisposeReason::GarbageCollected)
	}
}

impl std::fmt::Debug for ChannelOwnerImpl {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChannelOwnerImpl")
			.field("guid", &self.guid)
			.field("type_name", &self.type_name)
			.field("disposed", &self.is_disposed())
			.finish()
	}
}

#[cfg(test)]
impl std::fmt::Debug for dyn ChannelOwner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChannelOwner")
			.field("type_name", &self.type_name())
			.field("guid", &self.guid())
			.finish()
	}
}
