//! Connection layer for the remote-object protocol.
//!
//! This module implements request/response correlation and inbound routing
//! on top of the transport. It handles:
//! - Generating request ids and correlating responses with pending calls
//! - Applying object lifecycle messages (`__create__`, `__dispose__`,
//!   `__adopt__`) to the object tree
//! - Routing every other push message to the object it names
//! - Tearing the whole session down when the transport goes away
//!
//! # Message Flow
//!
//! 1. Caller invokes `send_message()` with guid, method, and params
//! 2. Connection allocates an id, stores a oneshot sender, and queues the request
//! 3. The writer task hands queued requests to the transport in order
//! 4. The run loop receives the response and completes the matching sender
//!
//! Inbound messages are processed strictly in arrival order and dispatch never
//! suspends: a listener that needs to wait spawns or uses a [`Waiter`](crate::Waiter).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use pw_wire::{
	ADOPT_METHOD, AdoptParams, CREATE_METHOD, CreateParams, DISPOSE_METHOD, DisposeParams, ErrorPayload, Event,
	Message, Metadata, Request,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::channel_owner::{ChannelOwner, DisposeReason, ParentOrConnection};
use crate::codec::decode_params;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::factory::{FactoryRegistry, ObjectFactory, ROOT_GUID, RootObject};
use crate::timeout::{EffectiveTimeout, TimeoutSettings};
use crate::transport::{Transport, TransportParts, TransportReceiver};
use crate::waiter::SessionWaiter;

mod object_tree;

pub use object_tree::ObjectTree;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one connection for the lifetime of the process.
///
/// Handles are only valid within the session that created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
	fn next() -> Self {
		Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
	}

	pub fn as_u64(&self) -> u64 {
		self.0
	}
}

/// Trait defining the interface that ChannelOwner needs from a Connection.
///
/// Object-safe so nodes can hold an `Arc<dyn ConnectionLike>` without the
/// transport's type parameters.
pub trait ConnectionLike: Send + Sync {
	/// The session this connection represents.
	fn session_id(&self) -> SessionId;

	/// Session-wide configuration.
	fn config(&self) -> &SessionConfig;

	/// Root of the timeout settings chain.
	fn timeouts(&self) -> Arc<TimeoutSettings>;

	/// Send a message to the server and await the response.
	fn send_message(&self, guid: &str, method: &str, params: Value) -> BoxFuture<'_, Result<Value>>;

	/// Queue a message without awaiting its response; failures are logged.
	fn send_detached(&self, guid: &str, method: &str, params: Value);

	/// Pure lookup in the object tree.
	fn find_object(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>>;

	/// Lookup that reports a missing object as an error.
	///
	/// Objects of a kind known to close (pages, frames, contexts, browsers)
	/// are reported as [`Error::TargetClosed`]; anything else as
	/// [`Error::ObjectNotFound`].
	fn get_object(&self, guid: &str) -> Result<Arc<dyn ChannelOwner>> {
		self.find_object(guid).ok_or_else(|| missing_object_error(guid))
	}

	/// Parent of `guid` in the object tree.
	fn parent_of(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>>;

	/// Live children of `guid`, in creation order.
	fn children_of(&self, guid: &str) -> Vec<Arc<dyn ChannelOwner>>;

	/// Wait for an object to be created, with timeout.
	///
	/// A response can reference an object whose `__create__` message has not
	/// been processed yet.
	fn wait_for_object(&self, guid: &str, timeout: Duration) -> BoxFuture<'_, Result<Arc<dyn ChannelOwner>>>;

	/// True once the session has terminated.
	fn is_closed(&self) -> bool;

	/// Why the session terminated, if it has.
	fn close_reason(&self) -> Option<String>;

	/// Registers a waiter to be failed when the session terminates.
	///
	/// Returns `None` if the session is already closed.
	fn register_waiter(&self, waiter: Weak<dyn SessionWaiter>) -> Option<u64>;

	/// Removes a registration made with [`register_waiter`](Self::register_waiter).
	fn unregister_waiter(&self, id: u64);
}

fn target_type_for_guid(guid: &str) -> Option<&'static str> {
	match () {
		_ if guid.starts_with("page@") => Some("Page"),
		_ if guid.starts_with("frame@") => Some("Frame"),
		_ if guid.starts_with("browser-context@") => Some("BrowserContext"),
		_ if guid.starts_with("browser@") => Some("Browser"),
		_ => None,
	}
}

fn missing_object_error(guid: &str) -> Error {
	match target_type_for_guid(guid) {
		Some(target_type) => Error::target_closed(target_type, format!("Object not found: {guid}")),
		None => Error::ObjectNotFound {
			guid: guid.to_string(),
			expected: None,
		},
	}
}

/// Pending request callbacks keyed by request id.
type CallbackMap = Arc<Mutex<HashMap<u32, oneshot::Sender<Result<Value>>>>>;

/// RAII guard removing the callback when a request future is dropped early.
struct CancelGuard {
	id: u32,
	callbacks: CallbackMap,
	completed: bool,
}

impl CancelGuard {
	fn new(id: u32, callbacks: CallbackMap) -> Self {
		Self {
			id,
			callbacks,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.callbacks.lock().remove(&self.id).is_some() {
			tracing::debug!(id = self.id, "Caller abandoned request, late response will be dropped");
		}
	}
}

/// Future returned by [`Connection::send_message`] with cancellation cleanup.
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Connection to the server for one session.
///
/// Owns the object tree, the pending-call table, and the session-waiter
/// registry. Created with a session root node (guid `""`) already in the tree.
pub struct Connection {
	session_id: SessionId,
	config: SessionConfig,
	timeouts: Arc<TimeoutSettings>,
	/// Sequential request id counter
	last_id: AtomicU32,
	callbacks: CallbackMap,
	/// Outbound queue drained by the writer task
	outbound_tx: mpsc::UnboundedSender<Value>,
	// Taken once by run()
	transport_sender: Mutex<Option<Box<dyn Transport>>>,
	transport_receiver: Mutex<Option<Box<dyn TransportReceiver>>>,
	message_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
	outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
	objects: ObjectTree,
	factory: RwLock<Arc<dyn ObjectFactory>>,
	waiters: Mutex<HashMap<u64, Weak<dyn SessionWaiter>>>,
	next_waiter_id: AtomicU64,
	closed: AtomicBool,
	close_reason: Mutex<Option<String>>,
	closed_tx: watch::Sender<bool>,
}

impl Connection {
	/// Create a new Connection with the given transport.
	///
	/// Until [`set_factory`](Self::set_factory) is called every created object
	/// is a generic [`RemoteObject`](crate::RemoteObject).
	pub fn new(parts: TransportParts, config: SessionConfig) -> Arc<Self> {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (closed_tx, _) = watch::channel(false);
		let timeouts = TimeoutSettings::root(&config);

		let connection = Arc::new(Self {
			session_id: SessionId::next(),
			config,
			timeouts,
			last_id: AtomicU32::new(0),
			callbacks: Arc::new(Mutex::new(HashMap::new())),
			outbound_tx,
			transport_sender: Mutex::new(Some(sender)),
			transport_receiver: Mutex::new(Some(receiver)),
			message_rx: Mutex::new(Some(message_rx)),
			outbound_rx: Mutex::new(Some(outbound_rx)),
			objects: ObjectTree::new(),
			factory: RwLock::new(Arc::new(FactoryRegistry::new())),
			waiters: Mutex::new(HashMap::new()),
			next_waiter_id: AtomicU64::new(1),
			closed: AtomicBool::new(false),
			close_reason: Mutex::new(None),
			closed_tx,
		});

		let root = RootObject::new(Arc::clone(&connection) as Arc<dyn ConnectionLike>);
		connection.objects.insert_root(Arc::new(root));
		tracing::debug!(session = connection.session_id.as_u64(), "Connection created");
		connection
	}

	/// Set the object factory for creating protocol objects.
	pub fn set_factory(&self, factory: Arc<dyn ObjectFactory>) {
		*self.factory.write() = factory;
	}

	/// The parentless session root node.
	pub fn root(&self) -> Option<Arc<dyn ChannelOwner>> {
		self.objects.get(ROOT_GUID)
	}

	/// Number of live nodes, including the session root.
	pub fn object_count(&self) -> usize {
		self.objects.len()
	}

	/// Sends a message to the server and awaits the response.
	pub async fn send_message(&self, guid: &str, method: &str, params: Value) -> Result<Value> {
		let (id, rx) = self.enqueue(guid, method, params, Metadata::now())?;
		let guard = CancelGuard::new(id, Arc::clone(&self.callbacks));
		ResponseFuture { rx, guard }.await
	}

	/// Queues a message and logs, rather than returns, its failure.
	///
	/// The request is queued before this returns, so detached sends keep
	/// their call order on the wire.
	pub fn send_detached(&self, guid: &str, method: &str, params: Value) {
		let (id, rx) = match self.enqueue(guid, method, params, Metadata::internal()) {
			Ok(queued) => queued,
			Err(e) => {
				tracing::warn!(guid, method, error = %e, "Failed to queue detached call");
				return;
			}
		};
		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			tracing::debug!(id, guid, method, "No runtime, detached call result will not be observed");
			return;
		};
		let guid = guid.to_string();
		let method = method.to_string();
		handle.spawn(async move {
			if let Ok(Err(e)) = rx.await {
				tracing::warn!(id, guid, method, error = %e, "Detached call failed");
			}
		});
	}

	fn enqueue(
		&self,
		guid: &str,
		method: &str,
		params: Value,
		metadata: Metadata,
	) -> Result<(u32, oneshot::Receiver<Result<Value>>)> {
		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		{
			// Checked under the lock so terminate() cannot miss this entry.
			let mut callbacks = self.callbacks.lock();
			if self.closed.load(Ordering::SeqCst) {
				return Err(self.closed_error());
			}
			callbacks.insert(id, tx);
		}

		let request = Request {
			id,
			guid: Arc::from(guid),
			method: method.to_string(),
			params,
			metadata,
		};
		let request_value = match serde_json::to_value(&request) {
			Ok(value) => value,
			Err(e) => {
				self.callbacks.lock().remove(&id);
				return Err(e.into());
			}
		};

		tracing::debug!(id, guid, method, "Sending message");
		if self.outbound_tx.send(request_value).is_err() {
			self.callbacks.lock().remove(&id);
			tracing::error!(id, "Failed to queue message: outbound channel closed");
			return Err(Error::ChannelClosed);
		}
		Ok((id, rx))
	}

	/// Run the message dispatch loop until the transport ends or the session
	/// is closed.
	///
	/// Terminates the session on the way out.
	///
	/// # Errors
	///
	/// [`Error::InvalidArgument`] if called twice; the transport's error if
	/// the read loop failed.
	pub async fn run(self: &Arc<Self>) -> Result<()> {
		let (Some(transport_receiver), Some(mut transport_sender), Some(mut outbound_rx), Some(mut message_rx)) = (
			self.transport_receiver.lock().take(),
			self.transport_sender.lock().take(),
			self.outbound_rx.lock().take(),
			self.message_rx.lock().take(),
		) else {
			return Err(Error::InvalidArgument("run() can only be called once".to_string()));
		};

		let mut reader_handle = tokio::spawn(transport_receiver.run());

		let writer_handle = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = transport_sender.send(message).await {
					tracing::error!(error = %e, "Transport write error");
					break;
				}
			}
		});

		let mut closed_rx = self.closed_tx.subscribe();
		let mut read_result = None;
		while !self.is_closed() {
			tokio::select! {
				biased;
				message = message_rx.recv() => {
					let Some(message_value) = message else {
						break;
					};
					match serde_json::from_value::<Message>(message_value) {
						Ok(message) => {
							if let Err(e) = self.dispatch(message) {
								tracing::error!(error = %e, "Error dispatching message");
							}
						}
						Err(e) => tracing::error!(error = %e, "Failed to parse message"),
					}
				}
				result = &mut reader_handle, if read_result.is_none() => {
					// Drain whatever the reader queued before it stopped.
					read_result = Some(result);
				}
				_ = closed_rx.changed() => break,
			}
		}

		let read_result = match read_result {
			Some(result) => result,
			None => {
				reader_handle.abort();
				reader_handle.await
			}
		};
		let outcome = match read_result {
			Ok(Ok(())) => Ok(()),
			Ok(Err(e)) => {
				tracing::error!(error = %e, "Transport read error");
				Err(e)
			}
			Err(join) if join.is_cancelled() => Ok(()),
			Err(join) => Err(Error::TransportError(format!("Transport reader panicked: {join}"))),
		};

		let reason = match &outcome {
			Ok(()) => "Connection closed".to_string(),
			Err(e) => format!("Connection closed: {e}"),
		};
		self.terminate(&reason);
		writer_handle.abort();
		outcome
	}

	/// Applies one inbound message.
	///
	/// Never suspends. Messages for unknown or disposed objects are dropped.
	///
	/// # Errors
	///
	/// [`Error::ProtocolViolation`] when a lifecycle message or event payload
	/// references an object the client does not know.
	pub fn dispatch(&self, message: Message) -> Result<()> {
		match message {
			Message::Response(response) => {
				let Some(callback) = self.callbacks.lock().remove(&response.id) else {
					tracing::debug!(id = response.id, "Dropping response for unknown or abandoned request");
					return Ok(());
				};
				tracing::debug!(id = response.id, "Processing response");

				let result = match response.error {
					Some(error_wrapper) => Err(parse_protocol_error(error_wrapper.error)),
					None => Ok(response.result.unwrap_or(Value::Null)),
				};
				let _ = callback.send(result);
				Ok(())
			}
			Message::Event(event) => match event.method.as_str() {
				CREATE_METHOD => self.handle_create(&event),
				DISPOSE_METHOD => self.handle_dispose(&event),
				ADOPT_METHOD => self.handle_adopt(&event),
				_ => self.route_event(&event),
			},
			Message::Unknown(value) => {
				tracing::debug!(message = %value, "Unknown message type (forward-compatible, ignored)");
				Ok(())
			}
		}
	}

	/// Creates a node of `kind` under `parent_guid` and links it into the tree.
	///
	/// # Errors
	///
	/// [`Error::ProtocolViolation`] if the parent is unknown or the guid is
	/// already in use; [`Error::TargetClosed`] once the session has ended;
	/// whatever the factory reports for a kind it cannot build.
	pub fn create_object(
		&self,
		parent_guid: &str,
		kind: &str,
		guid: &str,
		initializer: Value,
	) -> Result<Arc<dyn ChannelOwner>> {
		if self.is_closed() {
			return Err(self.closed_error());
		}
		let parent = self
			.objects
			.get(parent_guid)
			.ok_or_else(|| Error::ProtocolViolation(format!("Parent object not found: {parent_guid}")))?;
		if self.objects.contains(guid) {
			return Err(Error::ProtocolViolation(format!("Duplicate object guid: {guid}")));
		}
		if parent.is_disposed() {
			return Err(Error::target_closed(
				parent.type_name(),
				format!("cannot create {guid} under disposed {parent_guid}"),
			));
		}

		let factory = Arc::clone(&*self.factory.read());
		let object = factory
			.create_object(
				ParentOrConnection::Parent(parent),
				kind.to_string(),
				Arc::from(guid),
				initializer,
			)
			.inspect_err(|e| tracing::debug!(kind, guid, error = %e, "Failed to create object"))?;
		if object.guid() != guid {
			return Err(Error::ProtocolViolation(format!(
				"Factory built {} for {kind} {guid}",
				object.guid()
			)));
		}

		self.objects.insert(parent_guid, Arc::clone(&object))?;
		tracing::debug!(kind, guid, parent = parent_guid, "Created object");
		Ok(object)
	}

	/// Disposes `guid` and its whole subtree, deepest descendants first.
	///
	/// The whole subtree is marked disposed before any hook runs, so nothing
	/// can be created beneath it while the cascade is in progress. Each node
	/// then runs its dispose hook and emits the local `closed` notification;
	/// nodes leave the tree only after every notification, so a child's
	/// listeners still see its parent in place. Nodes linked in concurrently
	/// are picked up by the next pass. Returns false if `guid` is unknown.
	pub fn dispose_object(&self, guid: &str, reason: DisposeReason) -> bool {
		let mut subtree = self.objects.post_order(guid);
		if subtree.is_empty() {
			return false;
		}
		while !subtree.is_empty() {
			let fresh: Vec<bool> = subtree.iter().map(|object| object.base().mark_disposed(reason)).collect();
			for (object, fresh) in subtree.iter().zip(fresh) {
				if fresh {
					object.on_dispose(reason);
					object.base().finish_dispose(reason);
					tracing::debug!(guid = object.guid(), reason = reason.as_str(), "Disposed object");
				}
			}
			for object in &subtree {
				self.objects.remove(object.guid());
			}
			subtree = self.objects.post_order(guid);
		}
		true
	}

	/// Ends the session.
	///
	/// Fails every pending call and every registered waiter with
	/// [`Error::TargetClosed`], then disposes the entire tree including the
	/// root. Idempotent; only the first reason is kept.
	pub fn terminate(&self, reason: &str) {
		{
			let _callbacks = self.callbacks.lock();
			if self.closed.swap(true, Ordering::SeqCst) {
				return;
			}
		}
		*self.close_reason.lock() = Some(reason.to_string());
		tracing::debug!(session = self.session_id.as_u64(), reason, "Terminating session");

		let pending: Vec<_> = self.callbacks.lock().drain().collect();
		for (id, callback) in pending {
			tracing::debug!(id, "Failing pending request");
			let _ = callback.send(Err(Error::target_closed("Connection", reason)));
		}

		let waiters: Vec<_> = self.waiters.lock().drain().collect();
		for (_, waiter) in waiters {
			if let Some(waiter) = waiter.upgrade() {
				waiter.session_closed(reason);
			}
		}

		self.dispose_object(ROOT_GUID, DisposeReason::SessionTerminated);
		self.objects.wake_all();
		self.closed_tx.send_replace(true);
	}

	/// Closes the session from the client side.
	pub fn close(&self) {
		self.terminate("Connection closed by client");
	}

	/// Resolves once the session has terminated.
	pub async fn closed(&self) {
		let mut rx = self.closed_tx.subscribe();
		let _ = rx.wait_for(|closed| *closed).await;
	}

	/// Sets the session-level default timeout, `None` to fall back to the
	/// configured process default.
	pub fn set_default_timeout(&self, timeout_ms: Option<f64>) {
		self.timeouts.set_default_timeout(timeout_ms);
	}

	/// Sets the session-level default navigation timeout.
	pub fn set_default_navigation_timeout(&self, timeout_ms: Option<f64>) {
		self.timeouts.set_default_navigation_timeout(timeout_ms);
	}

	/// Effective timeout for a call on `guid`, or on the session when the
	/// object is unknown.
	pub fn effective_timeout(&self, guid: &str, call_override: Option<f64>) -> EffectiveTimeout {
		match self.objects.get(guid) {
			Some(object) => object.timeouts().timeout(call_override),
			None => self.timeouts.timeout(call_override),
		}
	}

	fn handle_create(&self, event: &Event) -> Result<()> {
		let params: CreateParams = parse_params(event)?;
		self.create_object(&event.guid, &params.type_name, &params.guid, params.initializer)
			.map(|_| ())
	}

	fn handle_dispose(&self, event: &Event) -> Result<()> {
		let params: DisposeParams = if event.params.is_null() {
			DisposeParams::default()
		} else {
			parse_params(event)?
		};
		let reason = match params.reason.as_deref() {
			Some("gc") => DisposeReason::GarbageCollected,
			_ => DisposeReason::Closed,
		};
		if event.guid.as_ref() == ROOT_GUID {
			return Err(Error::ProtocolViolation("the session root cannot be disposed".to_string()));
		}
		if !self.dispose_object(&event.guid, reason) {
			tracing::debug!(guid = %event.guid, "Dispose for unknown object (ignored)");
		}
		Ok(())
	}

	fn handle_adopt(&self, event: &Event) -> Result<()> {
		let params: AdoptParams = parse_params(event)?;
		self.objects.reparent(&params.guid, &event.guid)?;
		tracing::debug!(child = %params.guid, new_parent = %event.guid, "Adopted object");
		Ok(())
	}

	fn route_event(&self, event: &Event) -> Result<()> {
		let object = match self.objects.get(&event.guid) {
			Some(object) if !object.is_disposed() => object,
			_ => {
				tracing::debug!(guid = %event.guid, method = %event.method, "Dropping event for unknown or disposed object");
				return Ok(());
			}
		};
		let params = decode_params(&event.params, self)?;
		tracing::debug!(guid = %event.guid, method = %event.method, "Dispatching event");
		object.on_event(&event.method, &params);
		object.base().emit(&event.method, &params);
		Ok(())
	}

	fn closed_error(&self) -> Error {
		let reason = self
			.close_reason
			.lock()
			.clone()
			.unwrap_or_else(|| "Connection closed".to_string());
		Error::target_closed("Connection", reason)
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("session_id", &self.session_id)
			.field("objects", &self.objects.len())
			.field("closed", &self.is_closed())
			.finish()
	}
}

fn parse_params<T: DeserializeOwned>(event: &Event) -> Result<T> {
	serde_json::from_value(event.params.clone())
		.map_err(|e| Error::ProtocolViolation(format!("{} on {}: malformed params: {e}", event.method, event.guid)))
}

/// Converts an [`ErrorPayload`] from the server into [`Error::Remote`].
fn parse_protocol_error(error: ErrorPayload) -> Error {
	Error::Remote {
		name: error.name.unwrap_or_else(|| "Error".to_string()),
		message: error.message,
		stack: error.stack,
	}
}

impl ConnectionLike for Connection {
	fn session_id(&self) -> SessionId {
		self.session_id
	}

	fn config(&self) -> &SessionConfig {
		&self.config
	}

	fn timeouts(&self) -> Arc<TimeoutSettings> {
		Arc::clone(&self.timeouts)
	}

	fn send_message(&self, guid: &str, method: &str, params: Value) -> BoxFuture<'_, Result<Value>> {
		let guid = guid.to_string();
		let method = method.to_string();
		Box::pin(async move { Connection::send_message(self, &guid, &method, params).await })
	}

	fn send_detached(&self, guid: &str, method: &str, params: Value) {
		Connection::send_detached(self, guid, method, params);
	}

	fn find_object(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
		self.objects.get(guid)
	}

	fn parent_of(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
		self.objects.parent_of(guid)
	}

	fn children_of(&self, guid: &str) -> Vec<Arc<dyn ChannelOwner>> {
		self.objects.children_of(guid)
	}

	fn wait_for_object(&self, guid: &str, timeout: Duration) -> BoxFuture<'_, Result<Arc<dyn ChannelOwner>>> {
		let guid = guid.to_string();
		Box::pin(async move {
			if self.is_closed() {
				return Err(self.closed_error());
			}
			tokio::select! {
				result = self.objects.wait_for(&guid, timeout) => match result {
					Ok(_) | Err(_) if self.is_closed() => Err(self.closed_error()),
					other => other,
				},
				_ = self.closed() => Err(self.closed_error()),
			}
		})
	}

	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	fn close_reason(&self) -> Option<String> {
		self.close_reason.lock().clone()
	}

	fn register_waiter(&self, waiter: Weak<dyn SessionWaiter>) -> Option<u64> {
		let mut waiters = self.waiters.lock();
		if self.is_closed() {
			return None;
		}
		let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
		waiters.insert(id, waiter);
		Some(id)
	}

	fn unregister_waiter(&self, id: u64) {
		self.waiters.lock().remove(&id);
	}
}

#[cfg(test)]
pub(crate) mod test_support {
	use std::sync::Arc;

	use tokio::io::{DuplexStream, duplex};

	use super::{Connection, ConnectionLike};
	use crate::config::SessionConfig;
	use crate::transport::PipeTransport;

	/// Connection plus the server ends of its pipes: read what the client
	/// wrote from the first, write server messages into the second.
	pub(crate) fn test_connection_with(config: SessionConfig) -> (Arc<Connection>, DuplexStream, DuplexStream) {
		let (stdin_read, stdin_write) = duplex(64 * 1024);
		let (stdout_read, stdout_write) = duplex(64 * 1024);

		let (transport, message_rx) = PipeTransport::new(stdin_write, stdout_read);
		let parts = transport.into_transport_parts(message_rx);
		let connection = Connection::new(parts, config);

		(connection, stdin_read, stdout_write)
	}

	pub(crate) fn test_connection() -> (Arc<Connection>, DuplexStream, DuplexStream) {
		test_connection_with(SessionConfig::default())
	}

	/// A connection nobody runs, for code that only needs a session handle.
	pub(crate) fn detached_connection() -> Arc<dyn ConnectionLike> {
		let (connection, _, _) = test_connection();
		connection
	}
}
