//! Channel - RPC communication proxy for ChannelOwner objects.
//!
//! Every outgoing call funnels through here: the effective timeout is
//! resolved against the object's [`TimeoutSettings`], the call is issued, and
//! failures are reclassified against session liveness before the caller sees
//! them.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::{RemoteValue, decode_params, encode_params, unresolved_references};
use crate::connection::ConnectionLike;
use crate::error::{Error, Result};
use crate::timeout::{EffectiveTimeout, TimeoutSettings};

/// Channel provides RPC communication for a ChannelOwner.
#[derive(Clone)]
pub struct Channel {
	guid: Arc<str>,
	type_name: String,
	connection: Arc<dyn ConnectionLike>,
	timeouts: Arc<TimeoutSettings>,
}

impl Channel {
	/// Creates a new Channel for the given object GUID.
	pub fn new(
		guid: Arc<str>,
		type_name: String,
		connection: Arc<dyn ConnectionLike>,
		timeouts: Arc<TimeoutSettings>,
	) -> Self {
		Self {
			guid,
			type_name,
			connection,
			timeouts,
		}
	}

	/// Sends a method call with typed params and result.
	///
	/// A `timeout` field already present in `params` is taken as the
	/// per-call override; the effective timeout is written back either way.
	pub async fn send<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
		let params = serde_json::to_value(params)?;
		let call_override = params.get("timeout").and_then(Value::as_f64);
		let response = self.send_with_timeout(method, params, call_override).await?;
		serde_json::from_value(response).map_err(Into::into)
	}

	/// Sends a method call with no parameters.
	pub async fn send_no_params<R: DeserializeOwned>(&self, method: &str) -> Result<R> {
		self.send(method, Value::Null).await
	}

	/// Sends a method call that returns no result (void).
	pub async fn send_no_result<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
		let _: Value = self.send(method, params).await?;
		Ok(())
	}

	/// Sends a call whose params carry the effective `timeout`.
	///
	/// `params` must be a JSON object or null. The resolved timeout is written
	/// into the `timeout` field, 0 meaning no timeout.
	pub async fn send_with_timeout(
		&self,
		method: &str,
		params: Value,
		timeout_override: Option<f64>,
	) -> Result<Value> {
		let timeout = self.timeouts.timeout(timeout_override);
		let params = with_timeout(params, timeout)?;
		self.send_raw(method, params).await
	}

	/// Calls `method` with native params, returning the decoded result.
	///
	/// Handles in `params` are sent as guid references; handles in the
	/// result are resolved against the object tree, waiting up to the
	/// configured object wait for any whose creation is still pending.
	pub async fn call(
		&self,
		method: &str,
		params: &RemoteValue,
		timeout_override: Option<f64>,
	) -> Result<RemoteValue> {
		let encoded = encode_params(params, self.connection.as_ref())?;
		let result = self.send_with_timeout(method, encoded, timeout_override).await?;

		// The response may arrive ahead of the creation of objects it names.
		let wait = self.connection.config().object_wait_timeout;
		for guid in unresolved_references(&result, self.connection.as_ref()) {
			tracing::debug!(guid = %self.guid, method, referenced = %guid, "Waiting for referenced object");
			self.connection
				.wait_for_object(&guid, wait)
				.await
				.map_err(|e| self.classify(e))?;
		}
		decode_params(&result, self.connection.as_ref())
	}

	/// Queues a call without waiting for the response; failures are only logged.
	pub fn send_detached(&self, method: &str, params: Value) {
		self.connection.send_detached(&self.guid, method, params);
	}

	/// Effective timeout for an ordinary call on this object.
	pub fn effective_timeout(&self, timeout_override: Option<f64>) -> EffectiveTimeout {
		self.timeouts.timeout(timeout_override)
	}

	/// Returns the GUID this channel represents.
	pub fn guid(&self) -> &str {
		&self.guid
	}

	async fn send_raw(&self, method: &str, params: Value) -> Result<Value> {
		if self.connection.is_closed() {
			return Err(self.closed_error());
		}
		self.connection
			.send_message(&self.guid, method, params)
			.await
			.map_err(|e| self.classify(e))
	}

	/// Maps a failed call onto the error the caller should see.
	///
	/// Once the session is down, every failure becomes [`Error::TargetClosed`].
	/// Low-level failures for an object that is no longer in the tree are
	/// reported the same way.
	pub fn classify(&self, err: Error) -> Error {
		if self.connection.is_closed() {
			return match err {
				Error::TargetClosed { .. } => err,
				_ => self.closed_error(),
			};
		}
		match err {
			Error::ChannelClosed | Error::TransportError(_) | Error::Io(_) | Error::ObjectNotFound { .. }
				if self.connection.find_object(&self.guid).is_none() =>
			{
				Error::target_closed(&self.type_name, format!("{} was disposed", self.guid))
			}
			Error::Remote { ref name, ref message, .. } if name == "TargetClosedError" => {
				Error::target_closed(&self.type_name, message.clone())
			}
			other => other,
		}
	}

	fn closed_error(&self) -> Error {
		let reason = self
			.connection
			.close_reason()
			.unwrap_or_else(|| "Session closed".to_string());
		Error::target_closed(&self.type_name, reason)
	}
}

impl std::fmt::Debug for Channel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Channel")
			.field("guid", &self.guid)
			.field("type_name", &self.type_name)
			.finish()
	}
}

fn with_timeout(params: Value, timeout: EffectiveTimeout) -> Result<Value> {
	let mut map = match params {
		Value::Null => serde_json::Map::new(),
		Value::Object(map) => map,
		other => {
			return Err(Error::InvalidArgument(format!(
				"call params must be an object, got {other}"
			)));
		}
	};
	map.insert("timeout".to_string(), serde_json::json!(timeout.as_wire_ms()));
	Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timeout_is_injected_into_params() {
		let params = with_timeout(serde_json::json!({"url": "about:blank"}), EffectiveTimeout::Millis(5000.0)).unwrap();
		assert_eq!(params["url"], "about:blank");
		assert_eq!(params["timeout"], 5000.0);

		let params = with_timeout(Value::Null, EffectiveTimeout::Infinite).unwrap();
		assert_eq!(params["timeout"], 0.0);
	}

	#[test]
	fn non_object_params_are_rejected() {
		let err = with_timeout(serde_json::json!([1, 2]), EffectiveTimeout::Infinite).unwrap_err();
		assert!(matches!(err, Error::InvalidArgument(_)));
	}
}
