//! Arena of live remote objects keyed by guid.
//!
//! Parent/child links are guids into the arena, never pointers between
//! objects. Per-guid [`Notify`] wakes only the waiters for that object, and
//! [`ObjectTree::wait_for`] registers before checking to prevent lost wakeups.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::channel_owner::ChannelOwner;
use crate::error::{Error, Result};

struct Node {
	object: Arc<dyn ChannelOwner>,
	parent: Option<Arc<str>>,
	children: Vec<Arc<str>>,
}

/// Object arena for one session.
#[derive(Default)]
pub struct ObjectTree {
	nodes: Mutex<HashMap<Arc<str>, Node>>,
	waiters: DashMap<Arc<str>, Arc<Notify>>,
}

impl ObjectTree {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts the parentless session root.
	pub fn insert_root(&self, object: Arc<dyn ChannelOwner>) {
		let guid: Arc<str> = Arc::from(object.guid());
		self.nodes.lock().insert(
			Arc::clone(&guid),
			Node {
				object,
				parent: None,
				children: Vec::new(),
			},
		);
		self.wake(&guid);
	}

	/// Links `object` under `parent`.
	///
	/// # Errors
	///
	/// [`Error::ProtocolViolation`] if the parent is unknown or the guid is
	/// already taken; [`Error::TargetClosed`] if the parent is disposed or
	/// being disposed.
	pub fn insert(&self, parent: &str, object: Arc<dyn ChannelOwner>) -> Result<()> {
		let guid: Arc<str> = Arc::from(object.guid());
		{
			let mut nodes = self.nodes.lock();
			if nodes.contains_key(&guid) {
				return Err(Error::ProtocolViolation(format!("duplicate object guid: {guid}")));
			}
			let Some((parent_key, parent_node)) = nodes.get_key_value(parent) else {
				return Err(Error::ProtocolViolation(format!("parent object not found: {parent}")));
			};
			if parent_node.object.is_disposed() {
				return Err(Error::target_closed(
					parent_node.object.type_name(),
					format!("cannot create {guid} under disposed {parent}"),
				));
			}
			let parent_key = Arc::clone(parent_key);
			if let Some(parent_node) = nodes.get_mut(&parent_key) {
				parent_node.children.push(Arc::clone(&guid));
			}
			nodes.insert(
				Arc::clone(&guid),
				Node {
					object,
					parent: Some(parent_key),
					children: Vec::new(),
				},
			);
		}
		self.wake(&guid);
		Ok(())
	}

	/// Pure lookup.
	pub fn get(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
		self.nodes.lock().get(guid).map(|n| Arc::clone(&n.object))
	}

	pub fn contains(&self, guid: &str) -> bool {
		self.nodes.lock().contains_key(guid)
	}

	pub fn len(&self) -> usize {
		self.nodes.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.lock().is_empty()
	}

	pub fn parent_of(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
		let nodes = self.nodes.lock();
		let parent = nodes.get(guid)?.parent.as_ref()?;
		nodes.get(parent).map(|n| Arc::clone(&n.object))
	}

	/// Live children of `guid`, in creation order.
	pub fn children_of(&self, guid: &str) -> Vec<Arc<dyn ChannelOwner>> {
		let nodes = self.nodes.lock();
		nodes
			.get(guid)
			.map(|n| {
				n.children
					.iter()
					.filter_map(|c| nodes.get(c).map(|n| Arc::clone(&n.object)))
					.collect()
			})
			.unwrap_or_default()
	}

	/// Moves `child` under `new_parent`, keeping its own subtree.
	///
	/// # Errors
	///
	/// [`Error::ProtocolViolation`] if either guid is unknown or the move
	/// would make a node its own ancestor.
	pub fn reparent(&self, child: &str, new_parent: &str) -> Result<()> {
		let mut nodes = self.nodes.lock();
		let Some(parent_key) = nodes.get_key_value(new_parent).map(|(k, _)| Arc::clone(k)) else {
			return Err(Error::ProtocolViolation(format!("parent object not found: {new_parent}")));
		};
		let Some(child_key) = nodes.get_key_value(child).map(|(k, _)| Arc::clone(k)) else {
			return Err(Error::ProtocolViolation(format!("adopted object not found: {child}")));
		};

		let mut cursor = Some(Arc::clone(&parent_key));
		while let Some(guid) = cursor {
			if guid == child_key {
				return Err(Error::ProtocolViolation(format!(
					"cannot adopt {child} under its own descendant {new_parent}"
				)));
			}
			cursor = nodes.get(&guid).and_then(|n| n.parent.clone());
		}

		let old_parent = nodes.get_mut(&child_key).and_then(|n| n.parent.replace(Arc::clone(&parent_key)));
		if let Some(old) = old_parent.and_then(|p| nodes.get_mut(&p)) {
			old.children.retain(|c| *c != child_key);
		}
		if let Some(parent) = nodes.get_mut(&parent_key) {
			parent.children.push(child_key);
		}
		Ok(())
	}

	/// Snapshot of the subtree rooted at `guid`, children before their parent.
	///
	/// Siblings keep creation order. Empty if `guid` is unknown.
	pub fn post_order(&self, guid: &str) -> Vec<Arc<dyn ChannelOwner>> {
		let nodes = self.nodes.lock();
		let mut out = Vec::new();
		let Some(root) = nodes.get_key_value(guid).map(|(k, _)| Arc::clone(k)) else {
			return out;
		};

		// (guid, children expanded)
		let mut stack: Vec<(Arc<str>, bool)> = vec![(root, false)];
		while let Some((current, expanded)) = stack.pop() {
			let Some(node) = nodes.get(&current) else {
				continue;
			};
			if expanded {
				out.push(Arc::clone(&node.object));
				continue;
			}
			stack.push((Arc::clone(&current), true));
			for child in node.children.iter().rev() {
				stack.push((Arc::clone(child), false));
			}
		}
		out
	}

	/// Unlinks `guid` from the arena and from its parent's child list.
	///
	/// A node that still has children stays linked and `None` is returned;
	/// callers remove the children first.
	pub fn remove(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
		let mut nodes = self.nodes.lock();
		if !nodes.get(guid)?.children.is_empty() {
			return None;
		}
		let node = nodes.remove(guid)?;
		if let Some(parent) = node.parent.as_ref().and_then(|p| nodes.get_mut(p)) {
			parent.children.retain(|c| c.as_ref() != guid);
		}
		Some(node.object)
	}

	/// Waits for an object to be inserted, with timeout.
	///
	/// Registers the waiter before checking to prevent lost wakeups.
	pub async fn wait_for(&self, guid: &str, timeout: Duration) -> Result<Arc<dyn ChannelOwner>> {
		let g: Arc<str> = Arc::from(guid);
		let deadline = tokio::time::Instant::now() + timeout;

		loop {
			let notify = self
				.waiters
				.entry(Arc::clone(&g))
				.or_insert_with(|| Arc::new(Notify::new()))
				.clone();
			let notified = notify.notified();

			if let Some(obj) = self.get(&g) {
				return Ok(obj);
			}

			let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
			if remaining.is_zero() {
				return Err(timeout_error(&g, timeout));
			}

			tokio::select! {
				biased;
				_ = notified => {}
				_ = tokio::time::sleep(remaining) => {
					return Err(timeout_error(&g, timeout));
				}
			}
		}
	}

	/// Wakes every pending [`wait_for`](Self::wait_for) so it can re-check.
	pub fn wake_all(&self) {
		for entry in self.waiters.iter() {
			entry.value().notify_waiters();
		}
	}

	fn wake(&self, guid: &Arc<str>) {
		if let Some((_, notify)) = self.waiters.remove(guid) {
			notify.notify_waiters();
		}
	}
}

fn timeout_error(guid: &str, timeout: Duration) -> Error {
	Error::timeout(format!("object {guid}"), timeout.as_millis() as u64)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::channel_owner::{DisposeReason, ParentOrConnection};
	use crate::connection::test_support::detached_connection;
	use crate::factory::RemoteObject;

	fn object(conn: &Arc<dyn crate::ConnectionLike>, guid: &str) -> Arc<dyn ChannelOwner> {
		Arc::new(RemoteObject::new(
			ParentOrConnection::Connection(Arc::clone(conn)),
			"Thing".to_string(),
			Arc::from(guid),
			serde_json::Value::Null,
		))
	}

	fn guids(objects: &[Arc<dyn ChannelOwner>]) -> Vec<String> {
		objects.iter().map(|o| o.guid().to_string()).collect()
	}

	fn sample_tree() -> (ObjectTree, Arc<dyn crate::ConnectionLike>) {
		let conn = detached_connection();
		let tree = ObjectTree::new();
		tree.insert_root(object(&conn, ""));
		tree.insert("", object(&conn, "a")).unwrap();
		tree.insert("a", object(&conn, "a1")).unwrap();
		tree.insert("a1", object(&conn, "a1x")).unwrap();
		tree.insert("a", object(&conn, "a2")).unwrap();
		tree.insert("", object(&conn, "b")).unwrap();
		(tree, conn)
	}

	#[test]
	fn insert_requires_known_parent_and_fresh_guid() {
		let (tree, conn) = sample_tree();
		let err = tree.insert("missing", object(&conn, "c")).unwrap_err();
		assert!(err.is_protocol_violation());
		let err = tree.insert("", object(&conn, "a")).unwrap_err();
		assert!(err.is_protocol_violation());
		assert_eq!(tree.len(), 6);
	}

	#[test]
	fn post_order_lists_children_first() {
		let (tree, _conn) = sample_tree();
		assert_eq!(guids(&tree.post_order("a")), vec!["a1x", "a1", "a2", "a"]);
		assert_eq!(guids(&tree.post_order("")), vec!["a1x", "a1", "a2", "a", "b", ""]);
		assert!(tree.post_order("nope").is_empty());
	}

	#[test]
	fn remove_unlinks_from_parent() {
		let (tree, _conn) = sample_tree();
		assert!(tree.remove("a2").is_some());
		assert_eq!(guids(&tree.children_of("a")), vec!["a1"]);
		assert!(tree.get("a2").is_none());
		assert!(tree.remove("a2").is_none());
	}

	#[test]
	fn remove_keeps_nodes_with_children() {
		let (tree, _conn) = sample_tree();
		assert!(tree.remove("a").is_none());
		assert!(tree.contains("a"));
		assert_eq!(guids(&tree.children_of("")), vec!["a", "b"]);

		assert!(tree.remove("a1x").is_some());
		assert!(tree.remove("a1").is_some());
		assert!(tree.remove("a2").is_some());
		assert!(tree.remove("a").is_some());
		assert_eq!(guids(&tree.children_of("")), vec!["b"]);
	}

	#[test]
	fn insert_under_disposed_parent_is_rejected() {
		let (tree, conn) = sample_tree();
		let parent = tree.get("a1").unwrap();
		assert!(parent.base().mark_disposed(DisposeReason::Closed));

		let err = tree.insert("a1", object(&conn, "late")).unwrap_err();
		assert!(err.is_target_closed());
		assert!(!tree.contains("late"));
		assert_eq!(guids(&tree.children_of("a1")), vec!["a1x"]);
	}

	#[test]
	fn reparent_moves_subtree() {
		let (tree, _conn) = sample_tree();
		tree.reparent("a1", "b").unwrap();
		assert_eq!(guids(&tree.children_of("a")), vec!["a2"]);
		assert_eq!(guids(&tree.children_of("b")), vec!["a1"]);
		assert_eq!(tree.parent_of("a1").map(|p| p.guid().to_string()), Some("b".to_string()));
		assert_eq!(guids(&tree.post_order("b")), vec!["a1x", "a1", "b"]);
	}

	#[test]
	fn reparent_rejects_cycles_and_unknown_guids() {
		let (tree, _conn) = sample_tree();
		assert!(tree.reparent("a", "a1x").unwrap_err().is_protocol_violation());
		assert!(tree.reparent("zzz", "b").unwrap_err().is_protocol_violation());
		assert!(tree.reparent("a", "zzz").unwrap_err().is_protocol_violation());
	}

	#[tokio::test]
	async fn wait_for_sees_late_insert() {
		let (tree, conn) = sample_tree();
		let tree = Arc::new(tree);
		let waiter = {
			let tree = Arc::clone(&tree);
			tokio::spawn(async move { tree.wait_for("late", Duration::from_secs(5)).await })
		};
		tokio::task::yield_now().await;
		tree.insert("b", object(&conn, "late")).unwrap();
		let found = waiter.await.unwrap().unwrap();
		assert_eq!(found.guid(), "late");
	}

	#[tokio::test]
	async fn wait_for_times_out() {
		let (tree, _conn) = sample_tree();
		let err = tree.wait_for("never", Duration::from_millis(20)).await.unwrap_err();
		assert!(err.is_timeout());
	}
}
