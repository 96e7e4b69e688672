//! Wire types for the remote-object protocol.
//!
//! This crate contains the serde-serializable shapes exchanged with the
//! server: call/response/push envelopes, the serialized-value grammar used to
//! pass arguments and results across the boundary, and a handful of protocol
//! constants.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **1:1 with the wire**: Field names match what the server sends
//! - **Stable**: Changes only when the wire protocol changes
//!
//! Object lifetimes, event routing and waiting are built on top of these types
//! in `pw-remote`.

pub mod message;
pub mod options;
pub mod value;

pub use message::*;
pub use options::*;
pub use value::*;
