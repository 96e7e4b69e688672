//! Protocol constants and small parameter structs.

use serde::{Deserialize, Serialize};

/// Default timeout in milliseconds for remote operations.
///
/// 0 means "no timeout" wherever a timeout is accepted.
pub const DEFAULT_TIMEOUT_MS: f64 = 30000.0;

/// Method asking the server to start or stop emitting one event class.
pub const UPDATE_SUBSCRIPTION_METHOD: &str = "updateSubscription";

/// Params of [`UPDATE_SUBSCRIPTION_METHOD`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSubscriptionParams {
	/// Logical event name
	pub event: String,
	/// Whether the server should emit the event
	pub enabled: bool,
}

/// Options for waiting on an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForEventOptions {
	/// Maximum wait time in milliseconds, 0 for no timeout
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timeout: Option<f64>,
}

impl WaitForEventOptions {
	/// Creates new default options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the timeout.
	pub fn timeout(mut self, timeout: f64) -> Self {
		self.timeout = Some(timeout);
		self
	}
}
