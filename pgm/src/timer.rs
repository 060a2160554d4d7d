//! The timer subsystem: ambient SPM, heartbeat SPM, and per-peer NAK timeouts (spec §4.6).
//! Generalizes the teacher's `tunnel::timers::Timers` reset/cancel-on-progress pattern — deferred
//! work tracked as a deadline that is reset on progress and fires once elapsed — from a single
//! rekey timer owned per-connection to the several named timeouts PGM needs, owned per
//! (transport, peer) rather than per-connection, and from `stakker`'s actor-scheduled callbacks
//! to explicit `Option<Instant>` deadlines polled by the event loop (spec §5 supersedes the
//! teacher's single-threaded actor model).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::tsi::Tsi;

/// Which NAK-resolution deadline fired for a peer (spec §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NakTimeout {
	RdataWait,
	RepeatNakWait,
	NcfWait,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
	AmbientSpm,
	HeartbeatSpm,
	NakTimeout(Tsi, u32, NakTimeout),
}

struct Ambient {
	interval: Duration,
	next: Instant,
	/// The first three SPMs after bind are sent back-to-back, unconditionally (spec §4.6, §8 S6).
	burst_remaining: u32,
}

impl Ambient {
	fn new(now: Instant, interval: Duration) -> Self {
		Self { interval, next: now, burst_remaining: 3 }
	}

	fn poll(&mut self, now: Instant) -> bool {
		if now < self.next {
			return false;
		}
		if self.burst_remaining > 0 {
			self.burst_remaining -= 1;
			self.next = if self.burst_remaining > 0 { now } else { now + self.interval };
		} else {
			self.next = now + self.interval;
		}
		true
	}

	/// Marks the burst as already delivered by some other path (e.g. an explicit send loop at
	/// bind time) so a later `poll` doesn't repeat it.
	fn consume_burst(&mut self, now: Instant) {
		self.burst_remaining = 0;
		self.next = now + self.interval;
	}
}

struct Heartbeat {
	intervals: Vec<Duration>,
	index: usize,
	next: Option<Instant>,
}

impl Heartbeat {
	fn new(intervals: Vec<Duration>) -> Self {
		Self { intervals, index: 0, next: None }
	}

	/// Call after a data burst: (re)start the backoff schedule from its first interval.
	fn reset(&mut self, now: Instant) {
		self.index = 0;
		self.next = self.intervals.first().map(|&d| now + d);
	}

	fn cancel(&mut self) {
		self.next = None;
	}

	fn poll(&mut self, now: Instant) -> bool {
		let Some(due) = self.next else { return false };
		if now < due {
			return false;
		}

		self.index = (self.index + 1).min(self.intervals.len().saturating_sub(1));
		self.next = self.intervals.get(self.index).map(|&d| now + d);
		true
	}
}

#[derive(Default)]
struct NakState {
	rdata_wait: Option<Instant>,
	repeat_nak_wait: Option<Instant>,
	ncf_wait: Option<Instant>,
}

impl NakState {
	fn earliest(&self) -> Option<Instant> {
		[self.rdata_wait, self.repeat_nak_wait, self.ncf_wait].into_iter().flatten().min()
	}
}

pub struct Timers {
	ambient: Ambient,
	heartbeat: Heartbeat,
	nak: HashMap<(Tsi, u32), NakState>,
}

impl Timers {
	pub fn new(now: Instant, ambient_interval: Duration, heartbeat_intervals: Vec<Duration>) -> Self {
		Self { ambient: Ambient::new(now, ambient_interval), heartbeat: Heartbeat::new(heartbeat_intervals), nak: HashMap::new() }
	}

	pub fn on_data_sent(&mut self, now: Instant) {
		self.heartbeat.reset(now);
	}

	pub fn on_spm_sent(&mut self) {
		self.heartbeat.cancel();
	}

	/// Marks the initial ambient-SPM burst as already sent, so `poll` never re-fires it. Called
	/// once, right after `bind` sends the burst itself rather than waiting for the event loop.
	pub fn consume_ambient_burst(&mut self, now: Instant) {
		self.ambient.consume_burst(now);
	}

	pub fn arm_nak(&mut self, tsi: Tsi, sqn: u32, timeout: NakTimeout, now: Instant, wait: Duration) {
		let state = self.nak.entry((tsi, sqn)).or_default();
		let deadline = Some(now + wait);
		match timeout {
			NakTimeout::RdataWait => state.rdata_wait = deadline,
			NakTimeout::RepeatNakWait => state.repeat_nak_wait = deadline,
			NakTimeout::NcfWait => state.ncf_wait = deadline,
		}
	}

	/// Cancels every pending timeout for `sqn` — called once the sqn resolves (data or parity
	/// arrives).
	pub fn disarm(&mut self, tsi: Tsi, sqn: u32) {
		self.nak.remove(&(tsi, sqn));
	}

	/// The earliest time the event loop must wake up to service a due timer (spec §4.6's
	/// `next_poll`).
	pub fn next_due(&self, now: Instant) -> Option<Instant> {
		let candidates = [Some(self.ambient.next), self.heartbeat.next].into_iter().flatten().chain(self.nak.values().filter_map(NakState::earliest));
		candidates.min().map(|t| t.max(now))
	}

	/// Advances every timer to `now`, returning the events that fired. NAK timeouts that fire are
	/// removed from tracking — the caller transitions the corresponding receive-window entry to
	/// `Lost` and, if retries remain, re-arms the next stage.
	pub fn poll(&mut self, now: Instant) -> Vec<Event> {
		let mut events = Vec::new();

		if self.ambient.poll(now) {
			events.push(Event::AmbientSpm);
		}
		if self.heartbeat.poll(now) {
			events.push(Event::HeartbeatSpm);
		}

		let mut fired = Vec::new();
		for (&(tsi, sqn), state) in self.nak.iter_mut() {
			let stage = [
				(state.rdata_wait, NakTimeout::RdataWait),
				(state.repeat_nak_wait, NakTimeout::RepeatNakWait),
				(state.ncf_wait, NakTimeout::NcfWait),
			]
			.into_iter()
			.find_map(|(deadline, kind)| (deadline.is_some_and(|d| now >= d)).then_some(kind));

			if let Some(kind) = stage {
				fired.push((tsi, sqn, kind));
			}
		}

		for &(tsi, sqn, kind) in &fired {
			let state = self.nak.get_mut(&(tsi, sqn)).unwrap();
			match kind {
				NakTimeout::RdataWait => state.rdata_wait = None,
				NakTimeout::RepeatNakWait => state.repeat_nak_wait = None,
				NakTimeout::NcfWait => state.ncf_wait = None,
			}
			events.push(Event::NakTimeout(tsi, sqn, kind));
		}

		events
	}
}

/// Random jitter applied to repeat-NAK scheduling, matching the teacher's `Timers::jitter`.
pub fn jitter(max: Duration) -> Duration {
	let millis = max.as_millis().max(1) as u64;
	Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tsi() -> Tsi {
		Tsi::new([1, 2, 3, 4, 5, 6], 7500)
	}

	#[test]
	fn first_three_ambient_spms_fire_back_to_back() {
		let now = Instant::now();
		let mut timers = Timers::new(now, Duration::from_secs(30), vec![]);

		for _ in 0..3 {
			assert!(timers.poll(now).contains(&Event::AmbientSpm));
		}
		assert!(!timers.poll(now).contains(&Event::AmbientSpm));
	}

	#[test]
	fn consuming_the_burst_up_front_suppresses_it_on_first_poll() {
		let now = Instant::now();
		let mut timers = Timers::new(now, Duration::from_secs(30), vec![]);
		timers.consume_ambient_burst(now);

		assert!(!timers.poll(now).contains(&Event::AmbientSpm));
		assert!(!timers.poll(now + Duration::from_secs(29)).contains(&Event::AmbientSpm));
		assert!(timers.poll(now + Duration::from_secs(31)).contains(&Event::AmbientSpm));
	}

	#[test]
	fn nak_timeout_fires_once_armed_deadline_passes() {
		let now = Instant::now();
		let mut timers = Timers::new(now, Duration::from_secs(30), vec![]);
		timers.arm_nak(tsi(), 5, NakTimeout::RdataWait, now, Duration::from_millis(10));

		assert!(timers.poll(now).is_empty());
		let later = now + Duration::from_millis(11);
		assert!(timers.poll(later).contains(&Event::NakTimeout(tsi(), 5, NakTimeout::RdataWait)));
	}

	#[test]
	fn disarm_cancels_pending_timeouts() {
		let now = Instant::now();
		let mut timers = Timers::new(now, Duration::from_secs(30), vec![]);
		timers.arm_nak(tsi(), 5, NakTimeout::RdataWait, now, Duration::from_millis(10));
		timers.disarm(tsi(), 5);

		let later = now + Duration::from_secs(1);
		assert!(timers.poll(later).is_empty());
	}
}
