//! Exponential reconnect delay.
//!
//! ```text
//! delay[n] = min(base * 2^n, max)
//! ```
//!
//! where `n` is the number of retries already made since the last successful
//! connect.

use std::time::Duration;

/// Reconnect delay policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
	base: Duration,
	max: Duration,
}

impl Backoff {
	pub fn new(base: Duration, max: Duration) -> Self {
		Self { base, max }
	}

	/// Delay before retry number `attempts` (zero-based).
	///
	/// Saturates at `max`, including when the doubling would overflow.
	pub fn delay(&self, attempts: u32) -> Duration {
		2u32.checked_pow(attempts)
			.and_then(|factor| self.base.checked_mul(factor))
			.map_or(self.max, |delay| delay.min(self.max))
	}

	pub fn base(&self) -> Duration {
		self.base
	}

	pub fn max(&self) -> Duration {
		self.max
	}
}
