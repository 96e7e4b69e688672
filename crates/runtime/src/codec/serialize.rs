//! Serialized-value codec for script arguments and results.
//!
//! Containers are numbered on first visit. A container seen again within the
//! same call, whether shared or part of a cycle, is emitted as `{ref: id}`.
//! Handles are collected into a side table, de-duplicated by guid, and
//! referenced by index with `{h: index}`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pw_wire::{
	ErrorValue, HandleRef, ObjectEntry, RegExpValue, SerializedArgument, SerializedValue, SpecialValue,
	TypedArrayValue,
};

use super::value::RemoteValue;
use crate::channel_owner::ChannelOwner;
use crate::connection::ConnectionLike;
use crate::error::{Error, Result};

/// Encodes `value` for a call on `connection`'s session.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the value holds a handle that belongs
/// to another session or was already disposed.
pub fn serialize_argument(value: &RemoteValue, connection: &dyn ConnectionLike) -> Result<SerializedArgument> {
	let mut serializer = Serializer {
		connection,
		visited: HashMap::new(),
		last_id: 0,
		handles: Vec::new(),
		handle_index: HashMap::new(),
	};
	let value = serializer.serialize(value)?;
	Ok(SerializedArgument {
		value,
		handles: serializer.handles,
	})
}

/// Decodes an argument, resolving its handle table against `connection`.
///
/// # Errors
///
/// Returns [`Error::ProtocolViolation`] if a handle names an unknown object or
/// the tree references an id or handle index that was never defined.
pub fn parse_argument(argument: &SerializedArgument, connection: &dyn ConnectionLike) -> Result<RemoteValue> {
	let handles = argument
		.handles
		.iter()
		.map(|h| {
			connection
				.find_object(&h.guid)
				.ok_or_else(|| Error::ProtocolViolation(format!("handle references unknown object: {}", h.guid)))
		})
		.collect::<Result<Vec<_>>>()?;
	parse_value(&argument.value, &handles)
}

/// Decodes a serialized value whose handles are already resolved.
pub fn parse_value(value: &SerializedValue, handles: &[Arc<dyn ChannelOwner>]) -> Result<RemoteValue> {
	let mut parser = Parser {
		handles,
		refs: HashMap::new(),
	};
	parser.parse(value)
}

struct Serializer<'a> {
	connection: &'a dyn ConnectionLike,
	visited: HashMap<usize, u32>,
	last_id: u32,
	handles: Vec<HandleRef>,
	handle_index: HashMap<String, u32>,
}

impl Serializer<'_> {
	fn serialize(&mut self, value: &RemoteValue) -> Result<SerializedValue> {
		if let Some(key) = value.container_id() {
			if let Some(&id) = self.visited.get(&key) {
				return Ok(SerializedValue::Ref { reference: id });
			}
		}

		Ok(match value {
			RemoteValue::Null => SerializedValue::Special { v: SpecialValue::Null },
			RemoteValue::Undefined => SerializedValue::Special {
				v: SpecialValue::Undefined,
			},
			RemoteValue::Bool(b) => SerializedValue::Bool { b: *b },
			RemoteValue::Number(n) => serialize_number(*n),
			RemoteValue::String(s) => SerializedValue::Str { s: s.clone() },
			RemoteValue::BigInt(bi) => SerializedValue::BigInt { bi: bi.clone() },
			RemoteValue::Date(d) => SerializedValue::Date { d: d.clone() },
			RemoteValue::Url(u) => SerializedValue::Url { u: u.clone() },
			RemoteValue::RegExp { source, flags } => SerializedValue::RegExp {
				r: RegExpValue {
					p: source.clone(),
					f: flags.clone(),
				},
			},
			RemoteValue::Error { name, message, stack } => SerializedValue::Error {
				e: ErrorValue {
					m: message.clone(),
					n: name.clone(),
					s: stack.clone(),
				},
			},
			RemoteValue::Bytes(bytes) => SerializedValue::TypedArray {
				ta: TypedArrayValue::from_bytes(bytes),
			},
			RemoteValue::Handle(object) => SerializedValue::Handle {
				h: self.handle(object.as_ref())?,
			},
			RemoteValue::Array(items) => {
				let id = self.number(value);
				let items = items.read().clone();
				let a = items.iter().map(|item| self.serialize(item)).collect::<Result<Vec<_>>>()?;
				SerializedValue::Array { a, id }
			}
			RemoteValue::Object(entries) => {
				let id = self.number(value);
				let entries = entries.read().clone();
				let o = entries
					.iter()
					.map(|(k, v)| {
						Ok(ObjectEntry {
							k: k.clone(),
							v: self.serialize(v)?,
						})
					})
					.collect::<Result<Vec<_>>>()?;
				SerializedValue::Object { o, id }
			}
		})
	}

	fn number(&mut self, container: &RemoteValue) -> u32 {
		self.last_id += 1;
		if let Some(key) = container.container_id() {
			self.visited.insert(key, self.last_id);
		}
		self.last_id
	}

	fn handle(&mut self, object: &dyn ChannelOwner) -> Result<u32> {
		let session = self.connection.session_id();
		if object.connection().session_id() != session {
			return Err(Error::Serialization(format!(
				"{} {} belongs to a different session",
				object.type_name(),
				object.guid()
			)));
		}
		if object.is_disposed() || self.connection.is_closed() {
			return Err(Error::Serialization(format!(
				"{} {} is disposed and cannot be passed as an argument",
				object.type_name(),
				object.guid()
			)));
		}
		if let Some(&index) = self.handle_index.get(object.guid()) {
			return Ok(index);
		}
		let index = self.handles.len() as u32;
		self.handles.push(HandleRef {
			guid: object.guid().to_string(),
		});
		self.handle_index.insert(object.guid().to_string(), index);
		Ok(index)
	}
}

fn serialize_number(n: f64) -> SerializedValue {
	let special = if n.is_nan() {
		Some(SpecialValue::NaN)
	} else if n == f64::INFINITY {
		Some(SpecialValue::Infinity)
	} else if n == f64::NEG_INFINITY {
		Some(SpecialValue::NegInfinity)
	} else if n == 0.0 && n.is_sign_negative() {
		Some(SpecialValue::NegZero)
	} else {
		None
	};
	match special {
		Some(v) => SerializedValue::Special { v },
		None => SerializedValue::Number { n },
	}
}

struct Parser<'a> {
	handles: &'a [Arc<dyn ChannelOwner>],
	refs: HashMap<u32, RemoteValue>,
}

impl Parser<'_> {
	fn parse(&mut self, value: &SerializedValue) -> Result<RemoteValue> {
		Ok(match value {
			SerializedValue::Special { v } => match v {
				SpecialValue::Null => RemoteValue::Null,
				SpecialValue::Undefined => RemoteValue::Undefined,
				SpecialValue::NaN => RemoteValue::Number(f64::NAN),
				SpecialValue::Infinity => RemoteValue::Number(f64::INFINITY),
				SpecialValue::NegInfinity => RemoteValue::Number(f64::NEG_INFINITY),
				SpecialValue::NegZero => RemoteValue::Number(-0.0),
			},
			SerializedValue::Bool { b } => RemoteValue::Bool(*b),
			SerializedValue::Number { n } => RemoteValue::Number(*n),
			SerializedValue::Str { s } => RemoteValue::String(s.clone()),
			SerializedValue::BigInt { bi } => RemoteValue::BigInt(bi.clone()),
			SerializedValue::Date { d } => RemoteValue::Date(d.clone()),
			SerializedValue::Url { u } => RemoteValue::Url(u.clone()),
			SerializedValue::RegExp { r } => RemoteValue::RegExp {
				source: r.p.clone(),
				flags: r.f.clone(),
			},
			SerializedValue::Error { e } => RemoteValue::Error {
				name: e.n.clone(),
				message: e.m.clone(),
				stack: e.s.clone(),
			},
			SerializedValue::TypedArray { ta } => RemoteValue::Bytes(
				ta.to_bytes()
					.map_err(|e| Error::ProtocolViolation(format!("invalid typed array payload: {e}")))?,
			),
			SerializedValue::Handle { h } => self
				.handles
				.get(*h as usize)
				.cloned()
				.map(RemoteValue::Handle)
				.ok_or_else(|| Error::ProtocolViolation(format!("handle index {h} out of range")))?,
			SerializedValue::Ref { reference } => self
				.refs
				.get(reference)
				.cloned()
				.ok_or_else(|| Error::ProtocolViolation(format!("reference to undefined container id {reference}")))?,
			SerializedValue::Array { a, id } => {
				let shared = Arc::new(RwLock::new(Vec::with_capacity(a.len())));
				let array = RemoteValue::Array(Arc::clone(&shared));
				self.refs.insert(*id, array.clone());
				for item in a {
					let item = self.parse(item)?;
					shared.write().push(item);
				}
				array
			}
			SerializedValue::Object { o, id } => {
				let shared = Arc::new(RwLock::new(Vec::with_capacity(o.len())));
				let object = RemoteValue::Object(Arc::clone(&shared));
				self.refs.insert(*id, object.clone());
				for entry in o {
					let v = self.parse(&entry.v)?;
					shared.write().push((entry.k.clone(), v));
				}
				object
			}
		})
	}
}
