//! Error types for the remote-object runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the remote-object runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// The server referenced or acted on an object the client was never told about.
	///
	/// Indicates a lifecycle or serialization bug, not a user-recoverable condition.
	#[error("Protocol violation: {0}")]
	ProtocolViolation(String),

	/// The session, or the object an operation targeted, went away while the
	/// operation was outstanding.
	#[error("Target closed: Cannot perform operation on closed {target_type}. {context}")]
	TargetClosed { target_type: String, context: String },

	/// A wait deadline elapsed.
	#[error("Timeout {duration_ms}ms exceeded while waiting for {waiting_for}")]
	Timeout { waiting_for: String, duration_ms: u64 },

	/// A value could not be encoded for the wire.
	#[error("Serialization error: {0}")]
	Serialization(String),

	/// Remote server error with full context.
	#[error("{name}: {message}")]
	Remote {
		/// Error type name (e.g., "TimeoutError", "Error", "TargetClosedError")
		name: String,
		/// Human-readable error message
		message: String,
		/// Stack trace from the server (if available)
		stack: Option<String>,
	},

	/// Transport-level error.
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Object not found in the object tree.
	#[error("Object not found: {guid}{}", expected.map(|t| format!(" (expected {})", t)).unwrap_or_default())]
	ObjectNotFound { guid: String, expected: Option<&'static str> },

	/// Unknown protocol object type.
	#[error("Unknown protocol object type: {0}")]
	UnknownObjectType(String),

	/// Channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Invalid argument provided to method.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Builds a [`Error::TargetClosed`] for the given object kind.
	pub fn target_closed(target_type: impl Into<String>, context: impl Into<String>) -> Self {
		Error::TargetClosed {
			target_type: target_type.into(),
			context: context.into(),
		}
	}

	/// Builds a [`Error::Timeout`] for a wait bounded by `duration_ms`.
	pub fn timeout(waiting_for: impl Into<String>, duration_ms: u64) -> Self {
		Error::Timeout {
			waiting_for: waiting_for.into(),
			duration_ms,
		}
	}

	/// Returns the error name if this is a Remote error.
	pub fn error_name(&self) -> Option<&str> {
		match self {
			Error::Remote { name, .. } => Some(name),
			_ => None,
		}
	}

	/// Returns the stack trace if this is a Remote error with a stack.
	pub fn stack_trace(&self) -> Option<&str> {
		match self {
			Error::Remote { stack, .. } => stack.as_deref(),
			_ => None,
		}
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		match self {
			Error::Timeout { .. } => true,
			Error::Remote { name, .. } => name == "TimeoutError",
			_ => false,
		}
	}

	/// Returns true if this is a target closed error.
	pub fn is_target_closed(&self) -> bool {
		match self {
			Error::TargetClosed { .. } => true,
			Error::Remote { name, .. } => name == "TargetClosedError",
			_ => false,
		}
	}

	/// Returns true if this error means the server broke the protocol contract.
	pub fn is_protocol_violation(&self) -> bool {
		matches!(self, Error::ProtocolViolation(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn remote_names_classify() {
		let err = Error::Remote {
			name: "TargetClosedError".into(),
			message: "Target page, context or browser has been closed".into(),
			stack: None,
		};
		assert!(err.is_target_closed());
		assert!(!err.is_timeout());
		assert_eq!(err.error_name(), Some("TargetClosedError"));
	}

	#[test]
	fn timeout_message_carries_bound() {
		let err = Error::timeout("event \"ready\"", 1000);
		assert!(err.is_timeout());
		assert_eq!(err.to_string(), "Timeout 1000ms exceeded while waiting for event \"ready\"");
	}

	#[test]
	fn object_not_found_mentions_expected_type() {
		let err = Error::ObjectNotFound {
			guid: "page@1".into(),
			expected: Some("Page"),
		};
		assert_eq!(err.to_string(), "Object not found: page@1 (expected Page)");
	}

	#[test]
	fn io_and_json_errors_keep_their_source() {
		use std::error::Error as _;

		let err = Error::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"));
		assert!(matches!(err, Error::Io(ref io) if io.kind() == std::io::ErrorKind::BrokenPipe));
		assert!(err.source().is_some());

		let err: Error = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err().into();
		assert!(matches!(err, Error::Json(_)));
		assert!(err.source().is_some());
	}
}
