//! Session-wide configuration.

use std::time::Duration;

use pw_wire::DEFAULT_TIMEOUT_MS;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variable overriding [`SessionConfig::default_timeout_ms`].
pub const TIMEOUT_ENV: &str = "PW_REMOTE_TIMEOUT_MS";

/// Environment variable overriding [`SessionConfig::default_navigation_timeout_ms`].
pub const NAVIGATION_TIMEOUT_ENV: &str = "PW_REMOTE_NAVIGATION_TIMEOUT_MS";

/// Configuration shared by every object of one session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
	/// Process-wide timeout default in milliseconds, 0 for no timeout.
	pub default_timeout_ms: f64,
	/// Process-wide navigation timeout default, falls back to `default_timeout_ms`.
	pub default_navigation_timeout_ms: Option<f64>,
	/// How long to wait for an object whose creation message has not been processed yet.
	#[serde(with = "millis")]
	pub object_wait_timeout: Duration,
	/// Whether listener 0↔1 transitions ask the server to start/stop emitting.
	pub subscription_control: bool,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			default_timeout_ms: DEFAULT_TIMEOUT_MS,
			default_navigation_timeout_ms: None,
			object_wait_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS as u64),
			subscription_control: true,
		}
	}
}

impl SessionConfig {
	/// Creates the default configuration.
	pub fn new() -> Self {
		Self::default()
	}

	/// Defaults overlaid with [`TIMEOUT_ENV`] and [`NAVIGATION_TIMEOUT_ENV`].
	pub fn from_env() -> Result<Self> {
		Self::default().with_overrides(|key| std::env::var(key).ok())
	}

	/// Applies overrides from a key lookup, reporting malformed values.
	pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(raw) = lookup(TIMEOUT_ENV) {
			self.default_timeout_ms = parse_millis(TIMEOUT_ENV, &raw)?;
		}
		if let Some(raw) = lookup(NAVIGATION_TIMEOUT_ENV) {
			self.default_navigation_timeout_ms = Some(parse_millis(NAVIGATION_TIMEOUT_ENV, &raw)?);
		}
		Ok(self)
	}

	/// Sets the process-wide timeout default.
	pub fn default_timeout(mut self, timeout_ms: f64) -> Self {
		self.default_timeout_ms = timeout_ms;
		self
	}

	/// Sets the process-wide navigation timeout default.
	pub fn default_navigation_timeout(mut self, timeout_ms: f64) -> Self {
		self.default_navigation_timeout_ms = Some(timeout_ms);
		self
	}

	/// Sets the bound for waiting on not-yet-created objects.
	pub fn object_wait_timeout(mut self, timeout: Duration) -> Self {
		self.object_wait_timeout = timeout;
		self
	}

	/// Enables or disables remote subscription control.
	pub fn subscription_control(mut self, enabled: bool) -> Self {
		self.subscription_control = enabled;
		self
	}
}

fn parse_millis(key: &str, raw: &str) -> Result<f64> {
	match raw.trim().parse::<f64>() {
		Ok(ms) if ms >= 0.0 && Duration::try_from_secs_f64(ms / 1000.0).is_ok() => Ok(ms),
		_ => Err(Error::InvalidArgument(format!("{key} must be a non-negative number of milliseconds, got '{raw}'"))),
	}
}

mod millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer};

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let ms = u64::deserialize(deserializer)?;
		Ok(Duration::from_millis(ms))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_protocol_constants() {
		let cfg = SessionConfig::default();
		assert_eq!(cfg.default_timeout_ms, 30000.0);
		assert!(cfg.default_navigation_timeout_ms.is_none());
		assert!(cfg.subscription_control);
	}

	#[test]
	fn overrides_apply_from_lookup() {
		let cfg = SessionConfig::default()
			.with_overrides(|key| match key {
				TIMEOUT_ENV => Some("5000".to_string()),
				NAVIGATION_TIMEOUT_ENV => Some(" 0 ".to_string()),
				_ => None,
			})
			.unwrap();
		assert_eq!(cfg.default_timeout_ms, 5000.0);
		assert_eq!(cfg.default_navigation_timeout_ms, Some(0.0));
	}

	#[test]
	fn malformed_override_is_rejected() {
		let err = SessionConfig::default()
			.with_overrides(|key| (key == TIMEOUT_ENV).then(|| "-3".to_string()))
			.unwrap_err();
		assert!(matches!(err, Error::InvalidArgument(msg) if msg.contains(TIMEOUT_ENV)));
	}

	#[test]
	fn unrepresentable_override_is_rejected() {
		for raw in ["1e300", "inf", "NaN"] {
			let err = SessionConfig::default()
				.with_overrides(|key| (key == TIMEOUT_ENV).then(|| raw.to_string()))
				.unwrap_err();
			assert!(matches!(err, Error::InvalidArgument(_)), "{raw} accepted");
		}
	}

	#[test]
	fn deserializes_camel_case_with_defaults() {
		let cfg: SessionConfig = serde_json::from_value(serde_json::json!({
			"defaultTimeoutMs": 1000.0,
			"objectWaitTimeout": 250
		}))
		.unwrap();
		assert_eq!(cfg.default_timeout_ms, 1000.0);
		assert_eq!(cfg.object_wait_timeout, Duration::from_millis(250));
		assert!(cfg.subscription_control);
	}
}
