use std::time::{Duration, Instant, SystemTime};

/// Pairs a monotonic and a wall-clock reading taken at the same instant, so elapsed time can be
/// measured with [`Instant`] while still reporting a UNIX timestamp on the wire (PGM's SPM and
/// option headers carry NAK/expiry deadlines as absolute microsecond counts).
#[derive(Clone, Copy)]
pub struct Clock {
	epoch: Instant,
	epoch_sys: SystemTime,
}

impl Clock {
	pub fn new() -> Self {
		Self { epoch: Instant::now(), epoch_sys: SystemTime::now() }
	}

	/// Monotonic time elapsed since this clock was created.
	pub fn elapsed(&self) -> Duration {
		self.epoch.elapsed()
	}

	/// The current wall-clock time, derived from the monotonic clock so it never runs backwards
	/// even if the system clock is stepped.
	pub fn system_now(&self) -> SystemTime {
		self.epoch_sys + self.epoch.elapsed()
	}

	/// The current UNIX time, in microseconds, as used by PGM's internal `pgm_time_t`.
	pub fn unix_micros(&self) -> u64 {
		self.system_now()
			.duration_since(SystemTime::UNIX_EPOCH)
			.expect("current time should be after the UNIX epoch")
			.as_micros()
			.try_into()
			.expect("UNIX time in microseconds should fit in 64 bits")
	}
}

impl Default for Clock {
	fn default() -> Self {
		Self::new()
	}
}
