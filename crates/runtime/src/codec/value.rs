//! Native value model shared by both codecs.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::channel_owner::ChannelOwner;

/// Array storage with identity, so one array can appear in several places.
pub type SharedArray = Arc<RwLock<Vec<RemoteValue>>>;

/// Ordered key/value storage with identity.
pub type SharedObject = Arc<RwLock<Vec<(String, RemoteValue)>>>;

/// A value that can cross the client/server boundary.
///
/// Containers are reference-counted, so cloning a [`RemoteValue`] shares the
/// underlying array or object instead of copying it. That sharing is what the
/// serialized-value codec preserves: two positions holding the same container
/// encode as one container plus a back-reference, and parse back into one
/// shared container. Cyclic values are representable, but like any `Arc`
/// cycle they are only freed once a cycle edge is removed.
#[derive(Clone)]
pub enum RemoteValue {
	Null,
	Undefined,
	Bool(bool),
	Number(f64),
	String(String),
	/// Arbitrary-precision integer as decimal digits.
	BigInt(String),
	/// ISO-8601 timestamp.
	Date(String),
	Url(String),
	RegExp {
		source: String,
		flags: String,
	},
	Error {
		name: String,
		message: String,
		stack: Option<String>,
	},
	Bytes(Vec<u8>),
	Array(SharedArray),
	Object(SharedObject),
	/// Live proxy for a remote object.
	Handle(Arc<dyn ChannelOwner>),
}

impl RemoteValue {
	/// Creates a new (unshared) array.
	pub fn array(items: Vec<RemoteValue>) -> Self {
		RemoteValue::Array(Arc::new(RwLock::new(items)))
	}

	/// Creates a new (unshared) object, keeping entry order.
	pub fn object<K, I>(entries: I) -> Self
	where
		K: Into<String>,
		I: IntoIterator<Item = (K, RemoteValue)>,
	{
		let entries = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
		RemoteValue::Object(Arc::new(RwLock::new(entries)))
	}

	/// Wraps a live object as a handle.
	pub fn handle(object: Arc<dyn ChannelOwner>) -> Self {
		RemoteValue::Handle(object)
	}

	pub fn is_null(&self) -> bool {
		matches!(self, RemoteValue::Null | RemoteValue::Undefined)
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			RemoteValue::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			RemoteValue::Number(n) => Some(*n),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			RemoteValue::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_handle(&self) -> Option<&Arc<dyn ChannelOwner>> {
		match self {
			RemoteValue::Handle(h) => Some(h),
			_ => None,
		}
	}

	/// Looks up `key` in an object value.
	pub fn get(&self, key: &str) -> Option<RemoteValue> {
		match self {
			RemoteValue::Object(entries) => entries.read().iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()),
			_ => None,
		}
	}

	/// Returns the item at `index` of an array value.
	pub fn at(&self, index: usize) -> Option<RemoteValue> {
		match self {
			RemoteValue::Array(items) => items.read().get(index).cloned(),
			_ => None,
		}
	}

	/// Number of items (arrays) or entries (objects); 0 for scalars.
	pub fn len(&self) -> usize {
		match self {
			RemoteValue::Array(items) => items.read().len(),
			RemoteValue::Object(entries) => entries.read().len(),
			_ => 0,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Appends to an array value in place, visible through every clone.
	pub fn push(&self, item: RemoteValue) -> bool {
		match self {
			RemoteValue::Array(items) => {
				items.write().push(item);
				true
			}
			_ => false,
		}
	}

	/// Sets `key` on an object value in place, visible through every clone.
	pub fn insert(&self, key: impl Into<String>, value: RemoteValue) -> bool {
		let RemoteValue::Object(entries) = self else {
			return false;
		};
		let key = key.into();
		let mut entries = entries.write();
		match entries.iter_mut().find(|(k, _)| *k == key) {
			Some(slot) => slot.1 = value,
			None => entries.push((key, value)),
		}
		true
	}

	/// True when both values are the same container (or the same remote object).
	pub fn ptr_eq(&self, other: &RemoteValue) -> bool {
		match (self, other) {
			(RemoteValue::Array(a), RemoteValue::Array(b)) => Arc::ptr_eq(a, b),
			(RemoteValue::Object(a), RemoteValue::Object(b)) => Arc::ptr_eq(a, b),
			(RemoteValue::Handle(a), RemoteValue::Handle(b)) => a.guid() == b.guid(),
			_ => false,
		}
	}

	/// Identity of a container, used to detect sharing and cycles.
	pub(crate) fn container_id(&self) -> Option<usize> {
		match self {
			RemoteValue::Array(a) => Some(Arc::as_ptr(a) as *const () as usize),
			RemoteValue::Object(o) => Some(Arc::as_ptr(o) as *const () as usize),
			_ => None,
		}
	}

	/// Structural equality that terminates on cyclic values.
	///
	/// Handles compare by guid; NaN equals NaN and `-0` differs from `0`, so
	/// every value compares equal to its own round-trip.
	pub fn structurally_eq(&self, other: &RemoteValue) -> bool {
		let mut assumed = HashSet::new();
		eq_inner(self, other, &mut assumed)
	}
}

fn numbers_eq(a: f64, b: f64) -> bool {
	(a.is_nan() && b.is_nan()) || (a == b && a.is_sign_negative() == b.is_sign_negative())
}

fn eq_inner(a: &RemoteValue, b: &RemoteValue, assumed: &mut HashSet<(usize, usize)>) -> bool {
	use RemoteValue as V;

	if let (Some(ia), Some(ib)) = (a.container_id(), b.container_id()) {
		if !assumed.insert((ia, ib)) {
			return true;
		}
	}

	match (a, b) {
		(V::Null, V::Null) | (V::Undefined, V::Undefined) => true,
		(V::Bool(x), V::Bool(y)) => x == y,
		(V::Number(x), V::Number(y)) => numbers_eq(*x, *y),
		(V::String(x), V::String(y))
		| (V::BigInt(x), V::BigInt(y))
		| (V::Date(x), V::Date(y))
		| (V::Url(x), V::Url(y)) => x == y,
		(V::RegExp { source: s1, flags: f1 }, V::RegExp { source: s2, flags: f2 }) => s1 == s2 && f1 == f2,
		(
			V::Error {
				name: n1,
				message: m1,
				stack: s1,
			},
			V::Error {
				name: n2,
				message: m2,
				stack: s2,
			},
		) => n1 == n2 && m1 == m2 && s1 == s2,
		(V::Bytes(x), V::Bytes(y)) => x == y,
		(V::Handle(x), V::Handle(y)) => x.guid() == y.guid(),
		(V::Array(x), V::Array(y)) => {
			let xs = x.read().clone();
			let ys = y.read().clone();
			xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(p, q)| eq_inner(p, q, assumed))
		}
		(V::Object(x), V::Object(y)) => {
			let xs = x.read().clone();
			let ys = y.read().clone();
			xs.len() == ys.len()
				&& xs
					.iter()
					.zip(ys.iter())
					.all(|((k1, v1), (k2, v2))| k1 == k2 && eq_inner(v1, v2, assumed))
		}
		_ => false,
	}
}

impl PartialEq for RemoteValue {
	fn eq(&self, other: &Self) -> bool {
		self.structurally_eq(other)
	}
}

impl fmt::Debug for RemoteValue {
	/// Containers print shallowly so cyclic values stay printable.
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RemoteValue::Null => f.write_str("Null"),
			RemoteValue::Undefined => f.write_str("Undefined"),
			RemoteValue::Bool(b) => write!(f, "Bool({b})"),
			RemoteValue::Number(n) => write!(f, "Number({n})"),
			RemoteValue::String(s) => write!(f, "String({s:?})"),
			RemoteValue::BigInt(s) => write!(f, "BigInt({s})"),
			RemoteValue::Date(s) => write!(f, "Date({s})"),
			RemoteValue::Url(s) => write!(f, "Url({s})"),
			RemoteValue::RegExp { source, flags } => write!(f, "RegExp(/{source}/{flags})"),
			RemoteValue::Error { name, message, .. } => write!(f, "Error({name}: {message})"),
			RemoteValue::Bytes(b) => write!(f, "Bytes(len={})", b.len()),
			RemoteValue::Array(a) => {
				let items = a.read_recursive();
				let mut list = f.debug_list();
				for item in items.iter() {
					list.entry(&Shallow(item));
				}
				list.finish()
			}
			RemoteValue::Object(o) => {
				let entries = o.read_recursive();
				let mut map = f.debug_map();
				for (k, v) in entries.iter() {
					map.entry(k, &Shallow(v));
				}
				map.finish()
			}
			RemoteValue::Handle(h) => write!(f, "Handle({}@{})", h.type_name(), h.guid()),
		}
	}
}

struct Shallow<'a>(&'a RemoteValue);

impl fmt::Debug for Shallow<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.0 {
			RemoteValue::Array(a) => write!(f, "[..{}]", a.read_recursive().len()),
			RemoteValue::Object(o) => write!(f, "{{..{}}}", o.read_recursive().len()),
			other => other.fmt(f),
		}
	}
}

impl From<bool> for RemoteValue {
	fn from(value: bool) -> Self {
		RemoteValue::Bool(value)
	}
}

impl From<f64> for RemoteValue {
	fn from(value: f64) -> Self {
		RemoteValue::Number(value)
	}
}

impl From<i64> for RemoteValue {
	fn from(value: i64) -> Self {
		RemoteValue::Number(value as f64)
	}
}

impl From<&str> for RemoteValue {
	fn from(value: &str) -> Self {
		RemoteValue::String(value.to_string())
	}
}

impl From<String> for RemoteValue {
	fn from(value: String) -> Self {
		RemoteValue::String(value)
	}
}

impl From<Vec<u8>> for RemoteValue {
	fn from(value: Vec<u8>) -> Self {
		RemoteValue::Bytes(value)
	}
}

impl<T: Into<RemoteValue>> From<Option<T>> for RemoteValue {
	fn from(value: Option<T>) -> Self {
		value.map(Into::into).unwrap_or(RemoteValue::Null)
	}
}
