//! Value codec: native values to wire values and back.
//!
//! Two encodings share the [`RemoteValue`] model:
//!
//! - [`serialize_argument`] / [`parse_argument`]: the tagged serialized-value
//!   grammar used for script arguments and results, which preserves shared
//!   and cyclic structure and carries handles in a side table
//! - [`encode_params`] / [`decode_params`]: plain JSON method params and event
//!   payloads, where handles appear as `{"guid": ...}`

mod params;
mod serialize;
mod value;

pub use params::{decode_params, encode_params, unresolved_references};
pub use serialize::{parse_argument, parse_value, serialize_argument};
pub use value::{RemoteValue, SharedArray, SharedObject};
