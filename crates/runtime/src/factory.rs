//! Object factory - Creates protocol objects from type names.
//!
//! When the server announces a new object, the connection hands the kind
//! string to an [`ObjectFactory`]. [`FactoryRegistry`] maps kinds to
//! constructors and, unless strict, falls back to a generic [`RemoteObject`]
//! so unknown kinds still get a node in the tree.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection, private};
use crate::error::{Error, Result};

/// Kind of the session root node.
pub const ROOT_TYPE: &str = "Root";

/// Guid of the session root node.
pub const ROOT_GUID: &str = "";

/// Factory trait for creating protocol objects.
///
/// Decouples the connection from concrete node types. Construction is
/// synchronous so creation messages are applied in arrival order.
pub trait ObjectFactory: Send + Sync {
	/// Create a protocol object from a `__create__` message.
	///
	/// # Arguments
	/// * `parent` - The parent object
	/// * `type_name` - Protocol type name (e.g., "Browser", "Page")
	/// * `guid` - Unique identifier for the object
	/// * `initializer` - JSON initializer from the server
	fn create_object(
		&self,
		parent: ParentOrConnection,
		type_name: String,
		guid: Arc<str>,
		initializer: Value,
	) -> Result<Arc<dyn ChannelOwner>>;
}

/// Constructor registered for one protocol type name.
pub type Constructor = Box<dyn Fn(ParentOrConnection, String, Arc<str>, Value) -> Result<Arc<dyn ChannelOwner>> + Send + Sync>;

/// Maps protocol type names to constructors.
///
/// # Example
///
/// ```ignore
/// let mut registry = FactoryRegistry::new();
/// registry.register("Page", |parent, kind, guid, init| Ok(Arc::new(Page::new(parent, kind, guid, init)?)));
/// connection.set_factory(Arc::new(registry));
/// ```
#[derive(Default)]
pub struct FactoryRegistry {
	constructors: HashMap<String, Constructor>,
	strict: bool,
}

impl FactoryRegistry {
	/// Lenient registry: unknown kinds become [`RemoteObject`]s.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registry that rejects unknown kinds with [`Error::UnknownObjectType`].
	pub fn strict() -> Self {
		Self {
			constructors: HashMap::new(),
			strict: true,
		}
	}

	pub fn register<F>(&mut self, type_name: impl Into<String>, constructor: F) -> &mut Self
	where
		F: Fn(ParentOrConnection, String, Arc<str>, Value) -> Result<Arc<dyn ChannelOwner>> + Send + Sync + 'static,
	{
		self.constructors.insert(type_name.into(), Box::new(constructor));
		self
	}

	pub fn is_registered(&self, type_name: &str) -> bool {
		self.constructors.contains_key(type_name)
	}
}

impl ObjectFactory for FactoryRegistry {
	fn create_object(
		&self,
		parent: ParentOrConnection,
		type_name: String,
		guid: Arc<str>,
		initializer: Value,
	) -> Result<Arc<dyn ChannelOwner>> {
		match self.constructors.get(type_name.as_str()) {
			Some(constructor) => constructor(parent, type_name, guid, initializer),
			None if self.strict => Err(Error::UnknownObjectType(type_name)),
			None => Ok(Arc::new(RemoteObject::new(parent, type_name, guid, initializer))),
		}
	}
}

impl std::fmt::Debug for FactoryRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut kinds: Vec<&String> = self.constructors.keys().collect();
		kinds.sort();
		f.debug_struct("FactoryRegistry")
			.field("kinds", &kinds)
			.field("strict", &self.strict)
			.finish()
	}
}

/// Generic node for kinds without a dedicated type.
#[derive(Debug)]
pub struct RemoteObject {
	base: ChannelOwnerImpl,
}

impl RemoteObject {
	pub fn new(parent: ParentOrConnection, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		Self {
			base: ChannelOwnerImpl::new(parent, type_name, guid, initializer),
		}
	}
}

impl private::Sealed for RemoteObject {}

impl ChannelOwner for RemoteObject {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}

/// The parentless session root; top-level objects are created under it.
#[derive(Debug)]
pub struct RootObject {
	base: ChannelOwnerImpl,
}

impl RootObject {
	pub(crate) fn new(connection: Arc<dyn crate::ConnectionLike>) -> Self {
		Self {
			base: ChannelOwnerImpl::new(
				ParentOrConnection::Connection(connection),
				ROOT_TYPE.to_string(),
				Arc::from(ROOT_GUID),
				Value::Null,
			),
		}
	}
}

impl private::Sealed for RootObject {}

impl ChannelOwner for RootObject {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}
