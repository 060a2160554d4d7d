//! Token-bucket rate regulation (spec §4.3). The lock here is the leaf of the hierarchy in
//! §4.1 — nothing below it, and callers never hold it across a blocking operation.

use std::sync::Mutex;
use std::time::Instant;

use crate::error::{Error, Result};

struct State {
	tokens: f64,
	last_refill: Instant,
}

/// A token bucket: capacity is the configured max burst, refilled lazily at `rate` bytes/sec.
pub struct Regulator {
	rate: f64,
	capacity: f64,
	state: Mutex<State>,
}

impl Regulator {
	pub fn new(rate_bytes_per_sec: u64, capacity_bytes: u64) -> Self {
		Self {
			rate: rate_bytes_per_sec as f64,
			capacity: capacity_bytes as f64,
			state: Mutex::new(State { tokens: capacity_bytes as f64, last_refill: Instant::now() }),
		}
	}

	/// Admits `len` bytes, plus `overhead` bytes of IP/UDP header accounted against the bucket
	/// per packet. If the bucket holds fewer tokens than required, returns [`Error::WouldBlock`]
	/// without depleting; the caller decides what to do next — a nonblocking sender propagates
	/// the error, a blocking sender waits [`Self::wait_for`] and retries (never sleeping with
	/// this lock held, since it is the hierarchy's leaf).
	pub fn check(&self, len: usize, overhead: usize) -> Result<()> {
		let cost = (len + overhead) as f64;
		let mut state = self.state.lock().unwrap();

		let now = Instant::now();
		let elapsed = now.duration_since(state.last_refill).as_secs_f64();
		state.last_refill = now;
		state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);

		if state.tokens < cost {
			return Err(Error::WouldBlock);
		}

		state.tokens -= cost;
		Ok(())
	}

	/// How long a blocking caller denied by [`check`] should wait before the bucket can admit
	/// `len + overhead` bytes, given the current shortfall.
	pub fn wait_for(&self, len: usize, overhead: usize) -> std::time::Duration {
		let cost = (len + overhead) as f64;
		let state = self.state.lock().unwrap();
		let shortfall = (cost - state.tokens).max(0.0);
		std::time::Duration::from_secs_f64(shortfall / self.rate)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::thread;
	use std::time::Duration;

	#[test]
	fn admits_up_to_capacity_then_blocks_nonblocking_callers() {
		let reg = Regulator::new(1_000_000, 1000);
		assert!(reg.check(1000, 0).is_ok());
		assert!(matches!(reg.check(1, 0), Err(Error::WouldBlock)));
	}

	#[test]
	fn refills_over_time() {
		let reg = Regulator::new(1_000_000, 1000);
		reg.check(1000, 0).unwrap();
		thread::sleep(Duration::from_millis(5));
		assert!(reg.check(1000, 0).is_ok());
	}
}
