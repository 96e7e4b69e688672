//! One-shot cancellable waits over object events.
//!
//! A [`Waiter`] subscribes to a set of bindings when it starts:
//!
//! - resolve bindings (object, event, optional predicate) fulfil the wait
//!   with the event payload
//! - reject bindings (object, event, error factory) fail it unconditionally
//! - an optional deadline fails it with [`Error::Timeout`]
//!
//! Whichever fires first decides the outcome. At that instant every listener,
//! the deadline timer, and the session registration are torn down, so nothing
//! fires afterwards. Session termination fails every outstanding waiter with
//! [`Error::TargetClosed`].
//!
//! # Example
//!
//! ```ignore
//! let payload = WaiterBuilder::new("page load")
//!     .resolve_on(&page, "load")
//!     .reject_on_close(&page)
//!     .timeout(page.timeouts().timeout(None))
//!     .start()?
//!     .wait()
//!     .await?;
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use pw_wire::WaitForEventOptions;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::channel_owner::ChannelOwner;
use crate::codec::RemoteValue;
use crate::connection::ConnectionLike;
use crate::error::{Error, Result};
use crate::events::{CLOSED_EVENT, Listener, ListenerId};
use crate::timeout::EffectiveTimeout;

/// Receives the session-terminated signal.
pub trait SessionWaiter: Send + Sync {
	fn session_closed(&self, reason: &str);
}

type Predicate = Box<dyn Fn(&RemoteValue) -> bool + Send + Sync>;
type ErrorFactory = Box<dyn Fn(&RemoteValue) -> Error + Send + Sync>;

enum Binding {
	Resolve {
		object: Arc<dyn ChannelOwner>,
		event: String,
		predicate: Option<Predicate>,
	},
	Reject {
		object: Arc<dyn ChannelOwner>,
		event: String,
		factory: ErrorFactory,
	},
}

impl Binding {
	fn object(&self) -> &Arc<dyn ChannelOwner> {
		match self {
			Binding::Resolve { object, .. } | Binding::Reject { object, .. } => object,
		}
	}
}

/// Collects bindings and a deadline, then [`start`](Self::start)s a [`Waiter`].
pub struct WaiterBuilder {
	description: String,
	bindings: Vec<Binding>,
	timeout: EffectiveTimeout,
}

impl WaiterBuilder {
	/// `description` names what is awaited in timeout and close errors.
	pub fn new(description: impl Into<String>) -> Self {
		Self {
			description: description.into(),
			bindings: Vec::new(),
			timeout: EffectiveTimeout::Infinite,
		}
	}

	/// Resolves with the payload of the first `event` on `object`.
	pub fn resolve_on(self, object: &Arc<dyn ChannelOwner>, event: &str) -> Self {
		self.bind(Binding::Resolve {
			object: Arc::clone(object),
			event: event.to_string(),
			predicate: None,
		})
	}

	/// Resolves with the payload of the first `event` on `object` that
	/// satisfies `predicate`.
	pub fn resolve_when<F>(self, object: &Arc<dyn ChannelOwner>, event: &str, predicate: F) -> Self
	where
		F: Fn(&RemoteValue) -> bool + Send + Sync + 'static,
	{
		self.bind(Binding::Resolve {
			object: Arc::clone(object),
			event: event.to_string(),
			predicate: Some(Box::new(predicate)),
		})
	}

	/// Fails with `factory(payload)` on the first `event` on `object`.
	pub fn reject_on<F>(self, object: &Arc<dyn ChannelOwner>, event: &str, factory: F) -> Self
	where
		F: Fn(&RemoteValue) -> Error + Send + Sync + 'static,
	{
		self.bind(Binding::Reject {
			object: Arc::clone(object),
			event: event.to_string(),
			factory: Box::new(factory),
		})
	}

	/// Fails with [`Error::TargetClosed`] when `object` is disposed.
	pub fn reject_on_close(self, object: &Arc<dyn ChannelOwner>) -> Self {
		let target_type = object.type_name().to_string();
		let context = format!("{} closed while waiting for {}", object.guid(), self.description);
		self.reject_on(object, CLOSED_EVENT, move |_| Error::target_closed(&target_type, &context))
	}

	/// Sets the deadline.
	pub fn timeout(mut self, timeout: EffectiveTimeout) -> Self {
		self.timeout = timeout;
		self
	}

	/// Sets the deadline in milliseconds, 0 for none.
	pub fn timeout_ms(self, timeout_ms: f64) -> Self {
		self.timeout(EffectiveTimeout::from_millis(timeout_ms))
	}

	fn bind(mut self, binding: Binding) -> Self {
		self.bindings.push(binding);
		self
	}

	/// Subscribes every binding and arms the deadline.
	///
	/// A waiter started on a terminated session, or with a close binding on an
	/// already disposed object, is returned already failed.
	///
	/// # Errors
	///
	/// [`Error::InvalidArgument`] if there are no bindings, or a deadline is
	/// set outside a Tokio runtime.
	pub fn start(self) -> Result<Waiter> {
		let WaiterBuilder {
			description,
			bindings,
			timeout,
		} = self;

		let Some(connection) = bindings.first().map(|b| b.object().connection()) else {
			return Err(Error::InvalidArgument(format!("waiter for {description} has no bindings")));
		};
		let runtime = match timeout {
			EffectiveTimeout::Infinite => None,
			EffectiveTimeout::Millis(_) => Some(tokio::runtime::Handle::try_current().map_err(|_| {
				Error::InvalidArgument(format!("waiter for {description} has a deadline but no Tokio runtime"))
			})?),
		};

		let (tx, rx) = oneshot::channel();
		let shared = Arc::new(WaiterShared {
			description,
			outcome_tx: Mutex::new(Some(tx)),
			registrations: Mutex::new(Vec::new()),
			timer: Mutex::new(None),
			session: Mutex::new(None),
		});

		let mut closed_at_start = None;
		for binding in bindings {
			let object = Arc::clone(binding.object());
			let (event, listener) = match binding {
				Binding::Resolve { event, predicate, .. } => {
					let weak = Arc::downgrade(&shared);
					let listener: Listener = Arc::new(move |payload: &RemoteValue| {
						let Some(shared) = weak.upgrade() else {
							return;
						};
						if shared.is_finished() {
							return;
						}
						if predicate.as_ref().is_none_or(|matches| matches(payload)) {
							shared.finish(Ok(payload.clone()));
						}
					});
					(event, listener)
				}
				Binding::Reject { event, factory, .. } => {
					if event == CLOSED_EVENT && object.is_disposed() && closed_at_start.is_none() {
						closed_at_start = Some(factory(&RemoteValue::Null));
					}
					let weak = Arc::downgrade(&shared);
					let listener: Listener = Arc::new(move |payload: &RemoteValue| {
						if let Some(shared) = weak.upgrade() {
							if !shared.is_finished() {
								shared.finish(Err(factory(payload)));
							}
						}
					});
					(event, listener)
				}
			};
			let id = object.on(&event, listener);
			shared.registrations.lock().push((Arc::downgrade(&object), event, id));
		}

		if let (Some(runtime), Some(duration)) = (runtime, timeout.as_duration()) {
			let weak = Arc::downgrade(&shared);
			let duration_ms = timeout.as_millis_u64();
			let task = runtime.spawn(async move {
				tokio::time::sleep(duration).await;
				if let Some(shared) = weak.upgrade() {
					let err = Error::timeout(shared.description.clone(), duration_ms);
					shared.finish(Err(err));
				}
			});
			*shared.timer.lock() = Some(task.abort_handle());
		}

		let as_session_waiter: Weak<dyn SessionWaiter> = Arc::downgrade(&shared) as Weak<dyn SessionWaiter>;
		match connection.register_waiter(as_session_waiter) {
			Some(id) => *shared.session.lock() = Some((Arc::clone(&connection), id)),
			None => {
				let reason = connection
					.close_reason()
					.unwrap_or_else(|| "Session closed".to_string());
				shared.session_closed(&reason);
			}
		}

		if let Some(err) = closed_at_start {
			shared.finish(Err(err));
		}

		// A binding may have fired on another thread while later ones were
		// still being registered.
		if shared.is_finished() {
			shared.teardown();
		}

		tracing::debug!(waiting_for = %shared.description, "Waiter started");
		Ok(Waiter { shared, rx: Some(rx) })
	}
}

struct WaiterShared {
	description: String,
	outcome_tx: Mutex<Option<oneshot::Sender<Result<RemoteValue>>>>,
	registrations: Mutex<Vec<(Weak<dyn ChannelOwner>, String, ListenerId)>>,
	timer: Mutex<Option<AbortHandle>>,
	session: Mutex<Option<(Arc<dyn ConnectionLike>, u64)>>,
}

impl WaiterShared {
	fn is_finished(&self) -> bool {
		self.outcome_tx.lock().is_none()
	}

	/// Decides the outcome. Returns false if one was already decided.
	fn finish(&self, outcome: Result<RemoteValue>) -> bool {
		let Some(tx) = self.outcome_tx.lock().take() else {
			return false;
		};
		self.teardown();
		match &outcome {
			Ok(_) => tracing::debug!(waiting_for = %self.description, "Waiter resolved"),
			Err(e) => tracing::debug!(waiting_for = %self.description, error = %e, "Waiter rejected"),
		}
		let _ = tx.send(outcome);
		true
	}

	/// Drops the outcome without delivering one.
	fn abandon(&self) {
		if self.outcome_tx.lock().take().is_some() {
			tracing::debug!(waiting_for = %self.description, "Waiter abandoned");
			self.teardown();
		}
	}

	fn teardown(&self) {
		let registrations = std::mem::take(&mut *self.registrations.lock());
		for (object, event, id) in registrations {
			if let Some(object) = object.upgrade() {
				object.off(&event, id);
			}
		}
		if let Some(timer) = self.timer.lock().take() {
			timer.abort();
		}
		if let Some((connection, id)) = self.session.lock().take() {
			connection.unregister_waiter(id);
		}
	}
}

impl SessionWaiter for WaiterShared {
	fn session_closed(&self, reason: &str) {
		let context = format!("{reason} while waiting for {}", self.description);
		self.finish(Err(Error::target_closed("Connection", context)));
	}
}

/// A started wait.
///
/// Dropping it, or calling [`dispose`](Self::dispose), before an outcome
/// unsubscribes every binding immediately.
pub struct Waiter {
	shared: Arc<WaiterShared>,
	rx: Option<oneshot::Receiver<Result<RemoteValue>>>,
}

impl Waiter {
	/// Waits for the outcome.
	pub async fn wait(mut self) -> Result<RemoteValue> {
		let Some(rx) = self.rx.take() else {
			return Err(Error::ChannelClosed);
		};
		rx.await.unwrap_or(Err(Error::ChannelClosed))
	}

	/// Abandons the wait.
	pub fn dispose(self) {}

	/// True once an outcome was decided or the wait was abandoned.
	pub fn is_finished(&self) -> bool {
		self.shared.is_finished()
	}
}

impl Drop for Waiter {
	fn drop(&mut self) {
		self.shared.abandon();
	}
}

impl std::fmt::Debug for Waiter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Waiter")
			.field("waiting_for", &self.shared.description)
			.field("finished", &self.is_finished())
			.finish()
	}
}

/// Waits for the next `event` on `object`.
///
/// The deadline comes from `options` or the object's timeout settings; the
/// wait fails with [`Error::TargetClosed`] if the object is disposed first.
pub async fn wait_for_event(
	object: &Arc<dyn ChannelOwner>,
	event: &str,
	options: WaitForEventOptions,
) -> Result<RemoteValue> {
	wait_for_event_matching(object, event, options, |_| true).await
}

/// Like [`wait_for_event`], resolving only on payloads matching `predicate`.
pub async fn wait_for_event_matching<F>(
	object: &Arc<dyn ChannelOwner>,
	event: &str,
	options: WaitForEventOptions,
	predicate: F,
) -> Result<RemoteValue>
where
	F: Fn(&RemoteValue) -> bool + Send + Sync + 'static,
{
	let timeout = object.timeouts().timeout(options.timeout);
	WaiterBuilder::new(format!("event \"{event}\""))
		.resolve_when(object, event, predicate)
		.reject_on_close(object)
		.timeout(timeout)
		.start()?
		.wait()
		.await
}

#[cfg(test)]
mod tests {
	use std::time::{Duration, Instant};

	use pw_wire::{Event, Message};
	use serde_json::{Value, json};

	use super::*;
	use crate::channel_owner::DisposeReason;
	use crate::config::SessionConfig;
	use crate::connection::Connection;
	use crate::connection::test_support::test_connection_with;

	fn setup() -> (Arc<Connection>, Arc<dyn ChannelOwner>) {
		let (connection, _, _) = test_connection_with(SessionConfig::default().subscription_control(false));
		let page = connection.create_object("", "Page", "page@1", Value::Null).unwrap();
		(connection, page)
	}

	fn push(connection: &Connection, guid: &str, method: &str, params: Value) {
		connection
			.dispatch(Message::Event(Event {
				guid: Arc::from(guid),
				method: method.to_string(),
				params,
			}))
			.unwrap();
	}

	fn listeners(object: &Arc<dyn ChannelOwner>, event: &str) -> usize {
		object.base().events().listener_count(event)
	}

	#[tokio::test]
	async fn resolves_with_payload_before_deadline() {
		let (connection, page) = setup();
		let waiter = WaiterBuilder::new("ready").resolve_on(&page, "ready").timeout_ms(300.0).start().unwrap();

		let conn = Arc::clone(&connection);
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(50)).await;
			push(&conn, "page@1", "ready", json!({"value": 7}));
		});

		let payload = waiter.wait().await.unwrap();
		assert_eq!(payload.get("value").and_then(|v| v.as_f64()), Some(7.0));
		assert_eq!(listeners(&page, "ready"), 0);

		// Past the deadline nothing else happens.
		tokio::time::sleep(Duration::from_millis(350)).await;
		assert_eq!(listeners(&page, "ready"), 0);
	}

	#[tokio::test]
	async fn times_out_without_event() {
		let (_connection, page) = setup();
		let started = Instant::now();
		let err = WaiterBuilder::new("event \"ready\"")
			.resolve_on(&page, "ready")
			.timeout_ms(100.0)
			.start()
			.unwrap()
			.wait()
			.await
			.unwrap_err();

		assert!(started.elapsed() >= Duration::from_millis(100));
		match err {
			Error::Timeout { waiting_for, duration_ms } => {
				assert_eq!(waiting_for, "event \"ready\"");
				assert_eq!(duration_ms, 100);
			}
			other => panic!("expected timeout, got {other:?}"),
		}
		assert_eq!(listeners(&page, "ready"), 0);
	}

	#[tokio::test]
	async fn reject_binding_wins_over_later_resolve() {
		let (connection, page) = setup();
		let waiter = WaiterBuilder::new("data")
			.resolve_on(&page, "data")
			.reject_on(&page, "crash", |_| Error::target_closed("Page", "page crashed"))
			.start()
			.unwrap();

		push(&connection, "page@1", "crash", Value::Null);
		push(&connection, "page@1", "data", json!({"n": 1}));

		let err = waiter.wait().await.unwrap_err();
		assert!(err.is_target_closed());
		assert!(err.to_string().contains("page crashed"));
		assert_eq!(listeners(&page, "data"), 0);
		assert_eq!(listeners(&page, "crash"), 0);
	}

	#[tokio::test]
	async fn predicate_filters_payloads() {
		let (connection, page) = setup();
		let waiter = WaiterBuilder::new("third tick")
			.resolve_when(&page, "tick", |p| p.get("n").and_then(|n| n.as_f64()) == Some(3.0))
			.start()
			.unwrap();

		for n in 1..=4 {
			push(&connection, "page@1", "tick", json!({ "n": n }));
		}

		let payload = waiter.wait().await.unwrap();
		assert_eq!(payload.get("n").and_then(|n| n.as_f64()), Some(3.0));
	}

	#[tokio::test]
	async fn dispose_unsubscribes_immediately() {
		let (_connection, page) = setup();
		let waiter = WaiterBuilder::new("ready")
			.resolve_on(&page, "ready")
			.reject_on_close(&page)
			.timeout_ms(10_000.0)
			.start()
			.unwrap();
		assert_eq!(listeners(&page, "ready"), 1);

		waiter.dispose();
		assert_eq!(listeners(&page, "ready"), 0);
		assert_eq!(listeners(&page, CLOSED_EVENT), 0);
	}

	#[tokio::test]
	async fn abandoned_wait_future_unsubscribes() {
		let (_connection, page) = setup();
		let waiter = WaiterBuilder::new("ready").resolve_on(&page, "ready").start().unwrap();

		let result = tokio::time::timeout(Duration::from_millis(20), waiter.wait()).await;
		assert!(result.is_err());
		assert_eq!(listeners(&page, "ready"), 0);
	}

	#[tokio::test]
	async fn object_disposal_rejects_close_bound_waiter() {
		let (connection, page) = setup();
		let waiter = WaiterBuilder::new("load")
			.resolve_on(&page, "load")
			.reject_on_close(&page)
			.start()
			.unwrap();

		connection.dispose_object("page@1", DisposeReason::Closed);

		let err = waiter.wait().await.unwrap_err();
		assert!(err.is_target_closed());
		assert!(err.to_string().contains("while waiting for load"));
	}

	#[tokio::test]
	async fn waiter_on_disposed_object_fails_at_start() {
		let (connection, page) = setup();
		connection.dispose_object("page@1", DisposeReason::Closed);

		let waiter = WaiterBuilder::new("load")
			.resolve_on(&page, "load")
			.reject_on_close(&page)
			.start()
			.unwrap();
		assert!(waiter.is_finished());
		assert!(waiter.wait().await.unwrap_err().is_target_closed());
	}

	#[tokio::test]
	async fn session_termination_fails_waiter() {
		let (connection, page) = setup();
		let waiter = WaiterBuilder::new("ready").resolve_on(&page, "ready").start().unwrap();

		connection.terminate("Browser process exited");

		let err = waiter.wait().await.unwrap_err();
		assert!(err.is_target_closed());
		assert!(err.to_string().contains("Browser process exited"));
	}

	#[tokio::test]
	async fn waiter_started_after_termination_fails() {
		let (connection, page) = setup();
		connection.terminate("gone");

		let waiter = WaiterBuilder::new("ready").resolve_on(&page, "ready").start().unwrap();
		assert!(waiter.wait().await.unwrap_err().is_target_closed());
	}

	#[test]
	fn builder_without_bindings_is_rejected() {
		let err = WaiterBuilder::new("nothing").start().unwrap_err();
		assert!(matches!(err, Error::InvalidArgument(_)));
	}

	#[tokio::test]
	async fn wait_for_event_uses_object_default_timeout() {
		let (_connection, page) = setup();
		page.timeouts().set_default_timeout(Some(50.0));

		let err = wait_for_event(&page, "popup", WaitForEventOptions::new()).await.unwrap_err();
		assert!(matches!(err, Error::Timeout { duration_ms: 50, .. }));

		let err = wait_for_event(&page, "popup", WaitForEventOptions::new().timeout(20.0))
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Timeout { duration_ms: 20, .. }));
	}

	#[tokio::test]
	async fn unbounded_deadlines_wait_without_timer() {
		let (connection, page) = setup();
		let waiter = WaiterBuilder::new("ready")
			.resolve_on(&page, "ready")
			.timeout_ms(f64::INFINITY)
			.start()
			.unwrap();
		push(&connection, "page@1", "ready", json!({}));
		assert!(waiter.wait().await.is_ok());

		let conn = Arc::clone(&connection);
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			push(&conn, "page@1", "load", json!({"ok": true}));
		});
		let payload = wait_for_event(&page, "load", WaitForEventOptions::new().timeout(1e300))
			.await
			.unwrap();
		assert_eq!(payload.get("ok").and_then(|v| v.as_bool()), Some(true));

		// A bound that does not fit a Duration arms no timer.
		let waiter = WaiterBuilder::new("ready")
			.resolve_on(&page, "ready")
			.timeout(EffectiveTimeout::Millis(1e300))
			.start()
			.unwrap();
		assert!(!waiter.is_finished());
		waiter.dispose();
		assert_eq!(listeners(&page, "ready"), 0);
	}
}
