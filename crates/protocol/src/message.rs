//! Message envelopes exchanged with the server.
//!
//! Three shapes travel over the stream:
//!
//! - [`Request`]: a call addressed to an object by guid, answered by exactly one [`Response`]
//! - [`Response`]: the outcome of a call, correlated by `id`
//! - [`Event`]: a push notification addressed to an object by guid, never answered
//!
//! Object lifecycle is also carried as push messages using the reserved method
//! names [`CREATE_METHOD`], [`DISPOSE_METHOD`] and [`ADOPT_METHOD`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Push method announcing a new remote object under the addressed parent.
pub const CREATE_METHOD: &str = "__create__";

/// Push method announcing that the addressed object was disposed on the server.
pub const DISPOSE_METHOD: &str = "__dispose__";

/// Push method moving an existing object under the addressed parent.
pub const ADOPT_METHOD: &str = "__adopt__";

/// Metadata attached to every outbound call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
	/// Unix timestamp in milliseconds
	#[serde(rename = "wallTime")]
	pub wall_time: i64,
	/// Whether the runtime issued the call on its own behalf
	#[serde(skip_serializing_if = "Option::is_none")]
	pub internal: Option<bool>,
}

impl Metadata {
	/// Create minimal metadata with current timestamp.
	pub fn now() -> Self {
		let wall_time = std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.map(|d| d.as_millis() as i64)
			.unwrap_or_default();
		Self {
			wall_time,
			internal: Some(false),
		}
	}

	/// Metadata for calls the runtime issues on its own behalf.
	pub fn internal() -> Self {
		Self {
			internal: Some(true),
			..Self::now()
		}
	}
}

/// Call envelope sent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Correlation id, unique per connection
	pub id: u32,
	/// Guid of the target object
	#[serde(serialize_with = "serialize_arc_str", deserialize_with = "deserialize_arc_str")]
	pub guid: Arc<str>,
	/// Method name to invoke
	pub method: String,
	/// Method parameters
	pub params: Value,
	/// Call metadata
	pub metadata: Metadata,
}

/// Serde helpers for `Arc<str>` serialization
pub fn serialize_arc_str<S>(arc: &Arc<str>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
	S: serde::Serializer,
{
	serializer.serialize_str(arc)
}

pub fn deserialize_arc_str<'de, D>(deserializer: D) -> std::result::Result<Arc<str>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let s: String = serde::Deserialize::deserialize(deserializer)?;
	Ok(Arc::from(s.as_str()))
}

/// Response to a [`Request`], correlated by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// Request id this response correlates to
	pub id: u32,
	/// Success result (mutually exclusive with error)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error result (mutually exclusive with result)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorWrapper>,
}

/// Wrapper for protocol error payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWrapper {
	pub error: ErrorPayload,
}

/// Error details reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// Error message
	pub message: String,
	/// Error type name (e.g., "TimeoutError", "TargetClosedError")
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Stack trace
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

/// Push envelope emitted by the server for one object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	/// Guid of the object that emitted the event
	#[serde(serialize_with = "serialize_arc_str", deserialize_with = "deserialize_arc_str")]
	pub guid: Arc<str>,
	/// Event method name
	pub method: String,
	/// Event parameters
	#[serde(default)]
	pub params: Value,
}

/// Discriminated union of inbound messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Response message (has `id` field)
	Response(Response),
	/// Event message (no `id` field)
	Event(Event),
	/// Unknown message type (forward-compatible catch-all)
	Unknown(Value),
}

/// Params of a [`CREATE_METHOD`] push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateParams {
	/// Object kind, selects the client-side constructor
	#[serde(rename = "type")]
	pub type_name: String,
	/// Guid assigned by the server
	pub guid: String,
	/// Creation-time state snapshot
	#[serde(default)]
	pub initializer: Value,
}

/// Params of a [`DISPOSE_METHOD`] push.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisposeParams {
	/// `"gc"` when the server collected the object, absent when it was closed
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

/// Params of an [`ADOPT_METHOD`] push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdoptParams {
	/// Guid of the object changing parents
	pub guid: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn response_and_event_are_distinguished_by_id() {
		let response: Message = serde_json::from_str(r#"{"id": 3, "result": {"value": 1}}"#).unwrap();
		assert!(matches!(response, Message::Response(r) if r.id == 3));

		let event: Message = serde_json::from_str(r#"{"guid": "page@1", "method": "close"}"#).unwrap();
		match event {
			Message::Event(event) => {
				assert_eq!(event.guid.as_ref(), "page@1");
				assert!(event.params.is_null());
			}
			other => panic!("Expected Event, got {other:?}"),
		}
	}

	#[test]
	fn unknown_shapes_fall_through() {
		let message: Message = serde_json::from_str(r#"{"hello": "world"}"#).unwrap();
		assert!(matches!(message, Message::Unknown(_)));
	}

	#[test]
	fn create_params_use_wire_names() {
		let params: CreateParams = serde_json::from_value(serde_json::json!({
			"type": "Page",
			"guid": "page@2",
			"initializer": {"url": "about:blank"}
		}))
		.unwrap();
		assert_eq!(params.type_name, "Page");
		assert_eq!(params.initializer["url"], "about:blank");
	}

	#[test]
	fn request_serializes_guid_as_string() {
		let request = Request {
			id: 7,
			guid: Arc::from("frame@9"),
			method: "click".to_string(),
			params: serde_json::json!({"selector": "#go"}),
			metadata: Metadata::internal(),
		};
		let json = serde_json::to_value(&request).unwrap();
		assert_eq!(json["guid"], "frame@9");
		assert_eq!(json["metadata"]["internal"], true);
	}

	#[test]
	fn metadata_carries_only_time_and_origin() {
		let json = serde_json::to_value(Metadata::now()).unwrap();
		let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
		assert_eq!(keys.len(), 2);
		assert!(json["wallTime"].as_i64().unwrap() > 0);
		assert_eq!(json["internal"], false);
	}
}
