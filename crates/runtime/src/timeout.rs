//! Hierarchical timeout resolution.
//!
//! Three levels feed one effective deadline, highest precedence first:
//!
//! 1. the per-call override
//! 2. the per-object default, looked up through the object's ancestors up to
//!    the session root
//! 3. the process-wide default from [`SessionConfig`](crate::SessionConfig)
//!
//! The first level that is set wins. A value of 0 means "no timeout" and wins
//! like any other value, so lower levels are never consulted behind it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::SessionConfig;

/// Resolved deadline for one operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectiveTimeout {
	/// Wait forever.
	Infinite,
	/// Wait at most this many milliseconds.
	Millis(f64),
}

impl EffectiveTimeout {
	/// Interprets a millisecond value, 0 (or less) meaning infinite.
	///
	/// NaN and values too large for a [`Duration`] are infinite as well.
	pub fn from_millis(ms: f64) -> Self {
		if ms > 0.0 && Duration::try_from_secs_f64(ms / 1000.0).is_ok() {
			Self::Millis(ms)
		} else {
			Self::Infinite
		}
	}

	/// Returns the bound as a [`Duration`], `None` when infinite or when the
	/// bound does not fit a [`Duration`].
	pub fn as_duration(&self) -> Option<Duration> {
		match self {
			Self::Infinite => None,
			Self::Millis(ms) => Duration::try_from_secs_f64(ms / 1000.0).ok(),
		}
	}

	/// Returns the value the server expects in a `timeout` param (0 = infinite).
	pub fn as_wire_ms(&self) -> f64 {
		match self {
			Self::Infinite => 0.0,
			Self::Millis(ms) => *ms,
		}
	}

	/// Returns the bound in whole milliseconds for diagnostics.
	pub fn as_millis_u64(&self) -> u64 {
		self.as_wire_ms() as u64
	}

	pub fn is_infinite(&self) -> bool {
		matches!(self, Self::Infinite)
	}
}

/// Merges the three precedence levels into one effective timeout.
///
/// Pure; every argument is in milliseconds and 0 means "no timeout".
pub fn resolve_timeout(call: Option<f64>, object: Option<f64>, process: Option<f64>) -> EffectiveTimeout {
	call.or(object).or(process).map(EffectiveTimeout::from_millis).unwrap_or(EffectiveTimeout::Infinite)
}

/// Per-object timeout defaults, linked to the parent object's settings.
#[derive(Debug)]
pub struct TimeoutSettings {
	parent: Option<Arc<TimeoutSettings>>,
	default_timeout: RwLock<Option<f64>>,
	default_navigation_timeout: RwLock<Option<f64>>,
	process_timeout: Option<f64>,
	process_navigation_timeout: Option<f64>,
}

impl TimeoutSettings {
	/// Creates the session root, carrying the process-wide defaults.
	pub fn root(config: &SessionConfig) -> Arc<Self> {
		Arc::new(Self {
			parent: None,
			default_timeout: RwLock::new(None),
			default_navigation_timeout: RwLock::new(None),
			process_timeout: Some(config.default_timeout_ms),
			process_navigation_timeout: config.default_navigation_timeout_ms,
		})
	}

	/// Creates settings for a new object inheriting from `parent`.
	pub fn child(parent: &Arc<TimeoutSettings>) -> Arc<Self> {
		Arc::new(Self {
			parent: Some(Arc::clone(parent)),
			default_timeout: RwLock::new(None),
			default_navigation_timeout: RwLock::new(None),
			process_timeout: None,
			process_navigation_timeout: None,
		})
	}

	/// Sets (or clears) this object's default timeout.
	pub fn set_default_timeout(&self, timeout_ms: Option<f64>) {
		*self.default_timeout.write() = timeout_ms;
	}

	/// Sets (or clears) this object's default navigation timeout.
	pub fn set_default_navigation_timeout(&self, timeout_ms: Option<f64>) {
		*self.default_navigation_timeout.write() = timeout_ms;
	}

	/// This object's own default, ignoring ancestors.
	pub fn default_timeout(&self) -> Option<f64> {
		*self.default_timeout.read()
	}

	/// Effective timeout for an ordinary operation.
	pub fn timeout(&self, call_override: Option<f64>) -> EffectiveTimeout {
		let object = self.chain().find_map(|s| s.default_timeout());
		resolve_timeout(call_override, object, self.root_settings().process_timeout)
	}

	/// Effective timeout for a navigation.
	///
	/// At each object level the navigation default is preferred over the
	/// general default; the process level follows the same rule.
	pub fn navigation_timeout(&self, call_override: Option<f64>) -> EffectiveTimeout {
		let object = self
			.chain()
			.find_map(|s| (*s.default_navigation_timeout.read()).or_else(|| s.default_timeout()));
		let root = self.root_settings();
		let process = root.process_navigation_timeout.or(root.process_timeout);
		resolve_timeout(call_override, object, process)
	}

	fn chain(&self) -> impl Iterator<Item = &TimeoutSettings> {
		std::iter::successors(Some(self), |s| s.parent.as_deref())
	}

	fn root_settings(&self) -> &TimeoutSettings {
		self.chain().last().unwrap_or(self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn object_default_beats_process_default() {
		assert_eq!(resolve_timeout(None, Some(10000.0), Some(30000.0)), EffectiveTimeout::Millis(10000.0));
	}

	#[test]
	fn call_override_beats_everything() {
		assert_eq!(resolve_timeout(Some(5000.0), Some(10000.0), Some(30000.0)), EffectiveTimeout::Millis(5000.0));
	}

	#[test]
	fn zero_is_infinite_at_every_level() {
		assert!(resolve_timeout(Some(0.0), Some(0.0), Some(0.0)).is_infinite());
		assert!(resolve_timeout(None, None, None).is_infinite());
	}

	#[test]
	fn zero_short_circuits_lower_levels() {
		assert!(resolve_timeout(Some(0.0), Some(10000.0), Some(30000.0)).is_infinite());
		assert!(resolve_timeout(None, Some(0.0), Some(30000.0)).is_infinite());
	}

	#[test]
	fn children_inherit_through_the_chain() {
		let root = TimeoutSettings::root(&SessionConfig::default());
		let context = TimeoutSettings::child(&root);
		let page = TimeoutSettings::child(&context);

		assert_eq!(page.timeout(None), EffectiveTimeout::Millis(30000.0));

		context.set_default_timeout(Some(10000.0));
		assert_eq!(page.timeout(None), EffectiveTimeout::Millis(10000.0));

		page.set_default_timeout(Some(2000.0));
		assert_eq!(page.timeout(None), EffectiveTimeout::Millis(2000.0));
		assert_eq!(context.timeout(None), EffectiveTimeout::Millis(10000.0));
		assert_eq!(page.timeout(Some(50.0)), EffectiveTimeout::Millis(50.0));
	}

	#[test]
	fn navigation_prefers_navigation_defaults() {
		let root = TimeoutSettings::root(&SessionConfig::default().default_navigation_timeout(60000.0));
		let page = TimeoutSettings::child(&root);
		assert_eq!(page.navigation_timeout(None), EffectiveTimeout::Millis(60000.0));

		page.set_default_timeout(Some(7000.0));
		assert_eq!(page.navigation_timeout(None), EffectiveTimeout::Millis(7000.0));

		page.set_default_navigation_timeout(Some(9000.0));
		assert_eq!(page.navigation_timeout(None), EffectiveTimeout::Millis(9000.0));
		assert_eq!(page.timeout(None), EffectiveTimeout::Millis(7000.0));
	}

	#[test]
	fn unrepresentable_bounds_are_infinite() {
		assert!(EffectiveTimeout::from_millis(f64::INFINITY).is_infinite());
		assert!(EffectiveTimeout::from_millis(1e300).is_infinite());
		assert!(EffectiveTimeout::from_millis(f64::NAN).is_infinite());
		assert!(resolve_timeout(Some(f64::INFINITY), Some(10.0), None).is_infinite());
		assert_eq!(EffectiveTimeout::Millis(1e300).as_duration(), None);
		assert_eq!(EffectiveTimeout::Millis(f64::NAN).as_duration(), None);
	}

	#[test]
	fn conversions() {
		assert_eq!(EffectiveTimeout::Millis(1500.0).as_duration(), Some(Duration::from_millis(1500)));
		assert_eq!(EffectiveTimeout::Infinite.as_duration(), None);
		assert_eq!(EffectiveTimeout::Infinite.as_wire_ms(), 0.0);
	}
}
