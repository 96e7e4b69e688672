//! Remote-object runtime - object tree, event routing, waits, and value codec
//!
//! This crate is the protocol layer between high-level automation APIs and a
//! remote driver process:
//!
//! - **Object tree**: Mirrors server-side object lifetimes by guid, with
//!   deepest-first disposal cascades
//! - **Event routing**: Delivers push messages to the owning object and asks the
//!   server for an event only while someone listens to it
//! - **Waiter**: One-shot cancellable waits over events and deadlines
//! - **Value codec**: Native values to wire values and back, handles included
//! - **Timeouts**: Call override, per-object default, process default
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   API layer  │  Typed objects (Page, Frame, ...)
//! └──────┬───────┘
//!        │ implements ObjectFactory / ChannelOwner
//! ┌──────▼───────┐
//! │  pw-remote   │  This crate
//! │  ┌────────┐  │
//! │  │ Conn   │  │  Correlation, routing, object tree
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Waiter │  │  Event/deadline waits
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Codec  │  │  Serialized values and params
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  Length-prefixed pipe transport
//! │  └────────┘  │
//! └──────────────┘
//! ```
//!
//! # Decoupling via ObjectFactory
//!
//! The `Connection` builds nodes through the `ObjectFactory` trait, so this
//! crate never depends on concrete object types. Concrete nodes embed a
//! `ChannelOwnerImpl` and are recovered from `Arc<dyn ChannelOwner>` with
//! `downcast_arc`.

pub mod channel;
pub mod channel_owner;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod factory;
pub mod timeout;
pub mod transport;
pub mod waiter;

// Re-export key types at crate root
pub use channel::Channel;
pub use channel_owner::{ChannelOwner, ChannelOwnerImpl, DisposeReason, ParentOrConnection};
pub use codec::{
	RemoteValue, decode_params, encode_params, parse_argument, serialize_argument, unresolved_references,
};
pub use config::SessionConfig;
pub use connection::{Connection, ConnectionLike, ObjectTree, SessionId};
pub use error::{Error, Result};
pub use events::{CLOSED_EVENT, EventEmitter, EventSubscription, Listener, ListenerId};
pub use factory::{Constructor, FactoryRegistry, ObjectFactory, RemoteObject, RootObject};
pub use timeout::{EffectiveTimeout, TimeoutSettings, resolve_timeout};
pub use transport::{
	PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport, TransportParts, TransportReceiver,
};
pub use waiter::{Waiter, WaiterBuilder, wait_for_event, wait_for_event_matching};

pub use pw_wire as wire;
