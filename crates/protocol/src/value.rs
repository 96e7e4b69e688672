//! Serialized-value grammar.
//!
//! Values crossing the client/server boundary (script arguments, evaluation
//! results) are encoded as a tagged tree. Each node is a JSON object with a
//! single discriminating key:
//!
//! | Key   | Meaning                                           |
//! |-------|---------------------------------------------------|
//! | `v`   | special scalar (`null`, `undefined`, `NaN`, ...)  |
//! | `b`   | boolean                                           |
//! | `n`   | finite number                                     |
//! | `s`   | string                                            |
//! | `bi`  | bigint, decimal digits                            |
//! | `d`   | date, ISO-8601                                    |
//! | `u`   | URL                                               |
//! | `r`   | regular expression (`p` pattern, `f` flags)       |
//! | `e`   | error (`m` message, `n` name, `s` stack)          |
//! | `ta`  | typed array (`b` base64 bytes, `k` kind)          |
//! | `a`   | array, numbered by `id`                           |
//! | `o`   | object as ordered `{k, v}` entries, numbered by `id` |
//! | `ref` | back-reference to an already-numbered container   |
//! | `h`   | index into the argument's handle table            |

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// One node of a serialized value tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerializedValue {
	Special {
		v: SpecialValue,
	},
	Bool {
		b: bool,
	},
	Number {
		n: f64,
	},
	Str {
		s: String,
	},
	BigInt {
		bi: String,
	},
	Date {
		d: String,
	},
	Url {
		u: String,
	},
	RegExp {
		r: RegExpValue,
	},
	Error {
		e: ErrorValue,
	},
	TypedArray {
		ta: TypedArrayValue,
	},
	Array {
		a: Vec<SerializedValue>,
		#[serde(default)]
		id: u32,
	},
	Object {
		o: Vec<ObjectEntry>,
		#[serde(default)]
		id: u32,
	},
	Ref {
		#[serde(rename = "ref")]
		reference: u32,
	},
	Handle {
		h: u32,
	},
}

/// Scalars that have no JSON representation of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecialValue {
	#[serde(rename = "null")]
	Null,
	#[serde(rename = "undefined")]
	Undefined,
	#[serde(rename = "NaN")]
	NaN,
	#[serde(rename = "Infinity")]
	Infinity,
	#[serde(rename = "-Infinity")]
	NegInfinity,
	#[serde(rename = "-0")]
	NegZero,
}

/// Key/value pair of a serialized object, order preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
	pub k: String,
	pub v: SerializedValue,
}

/// Regular expression source and flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegExpValue {
	pub p: String,
	pub f: String,
}

/// Error carried as a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorValue {
	pub m: String,
	pub n: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub s: Option<String>,
}

/// Binary payload of a typed array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedArrayValue {
	/// Base64-encoded bytes
	pub b: String,
	/// Array kind, e.g. `ui8`
	pub k: String,
}

impl TypedArrayValue {
	/// Kind tag for plain byte arrays.
	pub const BYTES: &'static str = "ui8";

	/// Encodes raw bytes as a `ui8` typed array.
	pub fn from_bytes(bytes: &[u8]) -> Self {
		Self {
			b: STANDARD.encode(bytes),
			k: Self::BYTES.to_string(),
		}
	}

	/// Decodes the base64 payload.
	pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
		STANDARD.decode(&self.b)
	}
}

/// Reference to a remote object inside a handle table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleRef {
	pub guid: String,
}

/// A serialized value plus the handles it references by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedArgument {
	pub value: SerializedValue,
	#[serde(default)]
	pub handles: Vec<HandleRef>,
}
