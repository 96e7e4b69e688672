//! Params codec for method calls and event payloads.
//!
//! Method params and event payloads are plain JSON in which a remote object
//! appears as `{"guid": "..."}`. Decoding swaps those references for live
//! handles; encoding does the reverse.

use std::collections::HashSet;

use pw_wire::TypedArrayValue;
use serde_json::{Map, Number, Value};

use super::value::RemoteValue;
use crate::connection::ConnectionLike;
use crate::error::{Error, Result};

/// Decodes JSON params, resolving `{"guid"}` references to live objects.
///
/// # Errors
///
/// Returns [`Error::ProtocolViolation`] when a reference names an object the
/// client was never told about.
pub fn decode_params(params: &Value, connection: &dyn ConnectionLike) -> Result<RemoteValue> {
	Ok(match params {
		Value::Null => RemoteValue::Null,
		Value::Bool(b) => RemoteValue::Bool(*b),
		Value::Number(n) => RemoteValue::Number(n.as_f64().unwrap_or(f64::NAN)),
		Value::String(s) => RemoteValue::String(s.clone()),
		Value::Array(items) => RemoteValue::array(
			items
				.iter()
				.map(|item| decode_params(item, connection))
				.collect::<Result<Vec<_>>>()?,
		),
		Value::Object(map) => match guid_reference(map) {
			Some(guid) => connection
				.find_object(guid)
				.map(RemoteValue::Handle)
				.ok_or_else(|| Error::ProtocolViolation(format!("payload references unknown object: {guid}")))?,
			None => RemoteValue::object(
				map.iter()
					.map(|(k, v)| Ok((k.clone(), decode_params(v, connection)?)))
					.collect::<Result<Vec<_>>>()?,
			),
		},
	})
}

/// Encodes a value as JSON params, replacing handles with `{"guid"}`.
///
/// `undefined` entries are dropped from objects and become `null` elsewhere.
///
/// # Errors
///
/// Returns [`Error::Serialization`] for cycles, non-finite numbers, and
/// handles from another session or already disposed.
pub fn encode_params(value: &RemoteValue, connection: &dyn ConnectionLike) -> Result<Value> {
	let mut stack = HashSet::new();
	encode(value, connection, &mut stack)
}

/// Guids referenced by `params` that are not in the object tree yet.
///
/// Each guid is listed once, in first-seen order.
pub fn unresolved_references(params: &Value, connection: &dyn ConnectionLike) -> Vec<String> {
	let mut missing = Vec::new();
	collect_unresolved(params, connection, &mut missing);
	missing
}

fn collect_unresolved(value: &Value, connection: &dyn ConnectionLike, missing: &mut Vec<String>) {
	match value {
		Value::Array(items) => {
			for item in items {
				collect_unresolved(item, connection, missing);
			}
		}
		Value::Object(map) => match guid_reference(map) {
			Some(guid) => {
				if connection.find_object(guid).is_none() && !missing.iter().any(|m| m == guid) {
					missing.push(guid.to_string());
				}
			}
			None => {
				for item in map.values() {
					collect_unresolved(item, connection, missing);
				}
			}
		},
		_ => {}
	}
}

fn guid_reference(map: &Map<String, Value>) -> Option<&str> {
	if map.len() != 1 {
		return None;
	}
	map.get("guid").and_then(Value::as_str)
}

fn encode(value: &RemoteValue, connection: &dyn ConnectionLike, stack: &mut HashSet<usize>) -> Result<Value> {
	if let Some(key) = value.container_id() {
		if !stack.insert(key) {
			return Err(Error::Serialization("cyclic value cannot be sent as params".to_string()));
		}
	}

	let encoded = match value {
		RemoteValue::Null | RemoteValue::Undefined => Value::Null,
		RemoteValue::Bool(b) => Value::Bool(*b),
		RemoteValue::Number(n) => Number::from_f64(*n)
			.map(Value::Number)
			.ok_or_else(|| Error::Serialization(format!("{n} is not representable in params")))?,
		RemoteValue::String(s) | RemoteValue::BigInt(s) | RemoteValue::Date(s) | RemoteValue::Url(s) => {
			Value::String(s.clone())
		}
		RemoteValue::RegExp { source, flags } => serde_json::json!({ "source": source, "flags": flags }),
		RemoteValue::Error { name, message, stack } => {
			serde_json::json!({ "name": name, "message": message, "stack": stack })
		}
		RemoteValue::Bytes(bytes) => Value::String(TypedArrayValue::from_bytes(bytes).b),
		RemoteValue::Handle(object) => {
			if object.connection().session_id() != connection.session_id() {
				return Err(Error::Serialization(format!(
					"{} {} belongs to a different session",
					object.type_name(),
					object.guid()
				)));
			}
			if object.is_disposed() {
				return Err(Error::Serialization(format!(
					"{} {} is disposed",
					object.type_name(),
					object.guid()
				)));
			}
			serde_json::json!({ "guid": object.guid() })
		}
		RemoteValue::Array(items) => {
			let items = items.read().clone();
			Value::Array(
				items
					.iter()
					.map(|item| encode(item, connection, stack))
					.collect::<Result<Vec<_>>>()?,
			)
		}
		RemoteValue::Object(entries) => {
			let entries = entries.read().clone();
			let mut map = Map::new();
			for (k, v) in entries.iter() {
				if matches!(v, RemoteValue::Undefined) {
					continue;
				}
				map.insert(k.clone(), encode(v, connection, stack)?);
			}
			Value::Object(map)
		}
	};

	if let Some(key) = value.container_id() {
		stack.remove(&key);
	}
	Ok(encoded)
}
