//! Transmit window: an indexed ring of in-flight data packets, retained for retransmission and
//! parity generation (spec §4.2). Generalizes the teacher's `collections::sparse::Ring` — a
//! fixed-`N` presence-tracked ring addressed by index modulo capacity — to a capacity chosen at
//! `bind()` time rather than at compile time, since `txw_sqns` (or `txw_secs · txw_max_rte /
//! tpdu`) is a runtime configuration value.

use crate::error::{Error, Result};
use crate::fec::Rs;
use crate::packet::{self, DataKind, Fragment, Parity};
use crate::tsi::Tsi;

/// How transmit window capacity is sized: a fixed entry count, or a time/rate budget converted
/// to entries at `create` time.
#[derive(Clone, Copy)]
pub enum Capacity {
	Sqns(u32),
	TimeRate { secs: f64, rate_bytes_per_sec: u64 },
}

#[derive(Clone)]
pub struct Entry {
	pub sqn: u32,
	pub payload: Vec<u8>,
	pub trail_at_send: u32,
	pub tg_sqn: u32,
	pub is_parity: bool,
}

/// `pkt_dontwait_state`: the in-flight nonblocking APDU's starting sqn, saved so a partial
/// fragmentation failure can roll the window back atomically (spec §4.2, §8 property 3).
struct InFlightApdu {
	first_sqn: u32,
}

pub struct Txw {
	tsi: Tsi,
	tpdu: usize,
	capacity: usize,
	slots: Vec<Option<Entry>>,
	trail: u32,
	lead: u32,
	rs: Option<Rs>,
	k: usize,
	in_flight: Option<InFlightApdu>,
}

impl Txw {
	pub fn create(tsi: Tsi, tpdu: usize, capacity: Capacity, parity_enabled: bool, n: usize, k: usize, initial_sqn: u32) -> Result<Self> {
		let capacity = match capacity {
			Capacity::Sqns(sqns) => sqns as usize,
			Capacity::TimeRate { secs, rate_bytes_per_sec } => {
				let bytes = secs * rate_bytes_per_sec as f64;
				(bytes / tpdu as f64).ceil() as usize
			}
		};
		if capacity == 0 {
			return Err(Error::InvalidArgument("transmit window capacity must be nonzero".into()));
		}

		let rs = if parity_enabled { Some(Rs::new(n, k)?) } else { None };

		Ok(Self {
			tsi,
			tpdu,
			capacity,
			slots: vec![None; capacity],
			trail: initial_sqn.wrapping_sub(1),
			lead: initial_sqn.wrapping_sub(1),
			rs,
			k,
			in_flight: None,
		})
	}

	fn index(&self, sqn: u32) -> usize {
		(sqn as usize) % self.capacity
	}

	pub fn trail(&self) -> u32 {
		self.trail
	}

	pub fn lead(&self) -> u32 {
		self.lead
	}

	/// Marks the start of a nonblocking APDU's fragmentation, so a partial failure can roll back
	/// to exactly this point (spec §4.2's `pkt_dontwait_state.first_sqn`).
	pub fn begin_apdu(&mut self) {
		self.in_flight = Some(InFlightApdu { first_sqn: self.lead.wrapping_add(1) });
	}

	/// The APDU completed; its fragments are now ordinary retained entries.
	pub fn commit_apdu(&mut self) {
		self.in_flight = None;
	}

	/// Rolls the window back to the state before [`Self::begin_apdu`]: `lead` is restored and
	/// every fragment pushed since is evicted, so no partial APDU is observable (spec §8
	/// property 3).
	pub fn rollback_apdu(&mut self) {
		let Some(InFlightApdu { first_sqn }) = self.in_flight.take() else { return };

		let mut sqn = first_sqn;
		while sqn != self.lead.wrapping_add(1) {
			let idx = self.index(sqn);
			self.slots[idx] = None;
			sqn = sqn.wrapping_add(1);
		}

		self.lead = first_sqn.wrapping_sub(1);
	}

	/// Assigns `lead + 1`, stores the payload, and advances `lead`. If the window is full, the
	/// oldest entry is evicted and `trail` advances (spec §8 property 2: push is monotonic).
	pub fn push(&mut self, payload: Vec<u8>, tg_sqn: u32, is_parity: bool) -> u32 {
		let sqn = self.lead.wrapping_add(1);
		let idx = self.index(sqn);

		if self.len() as usize >= self.capacity {
			let evict_idx = self.index(self.trail);
			self.slots[evict_idx] = None;
			self.trail = self.trail.wrapping_add(1);
		}

		self.slots[idx] = Some(Entry { sqn, payload, trail_at_send: self.trail, tg_sqn, is_parity });
		self.lead = sqn;
		sqn
	}

	fn len(&self) -> u32 {
		self.lead.wrapping_sub(self.trail)
	}

	/// Returns the retained entry for `sqn`, or `None` if it has been evicted or never existed.
	pub fn peek(&self, sqn: u32) -> Option<&Entry> {
		let entry = self.slots[self.index(sqn)].as_ref()?;
		(entry.sqn == sqn).then_some(entry)
	}

	/// Re-encodes a retained entry as RDATA, for resend in response to a NAK.
	pub fn retransmit(&self, dport: u16, sqn: u32) -> Option<Vec<u8>> {
		let entry = self.peek(sqn)?;
		Some(packet::encode_data(
			DataKind::Repair,
			self.tsi,
			dport,
			entry.sqn,
			entry.trail_at_send,
			None,
			Parity { tg_sqn: Some(entry.tg_sqn), var_length: None },
			entry.is_parity,
			&entry.payload,
		))
	}

	/// RS-encodes the `parity_index`-th parity symbol for the transmission group starting at
	/// `tg_sqn`. The group's `k` data entries must still be retained.
	pub fn build_parity(&self, tg_sqn: u32, parity_index: usize) -> Result<Vec<u8>> {
		let rs = self.rs.as_ref().ok_or_else(|| Error::BadState("FEC not enabled on this window"))?;

		let mut blocks = Vec::with_capacity(self.k);
		for i in 0..self.k as u32 {
			let sqn = tg_sqn.wrapping_add(i);
			let entry = self.peek(sqn).ok_or(Error::BadState("transmission group data unavailable for parity"))?;
			blocks.push(entry.payload.as_slice());
		}

		let mut out = vec![0u8; self.tpdu];
		rs.encode(&blocks, parity_index, &mut out)?;
		Ok(out)
	}

	/// Releases every retained payload.
	pub fn shutdown(&mut self) {
		self.slots.iter_mut().for_each(|slot| *slot = None);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tsi() -> Tsi {
		Tsi::new([1, 2, 3, 4, 5, 6], 7500)
	}

	#[test]
	fn push_is_monotonic_and_peek_returns_the_exact_payload() {
		let mut txw = Txw::create(tsi(), 1500, Capacity::Sqns(8), false, 255, 223, 0).unwrap();
		let a = txw.push(b"one".to_vec(), 0, false);
		let b = txw.push(b"two".to_vec(), 0, false);
		assert_eq!(b, a + 1);
		assert_eq!(txw.peek(a).unwrap().payload, b"one");
		assert_eq!(txw.peek(b).unwrap().payload, b"two");
	}

	#[test]
	fn eviction_respects_capacity() {
		let mut txw = Txw::create(tsi(), 1500, Capacity::Sqns(2), false, 255, 223, 0).unwrap();
		let a = txw.push(b"one".to_vec(), 0, false);
		txw.push(b"two".to_vec(), 0, false);
		txw.push(b"three".to_vec(), 0, false);
		assert!(txw.peek(a).is_none());
		assert_eq!(txw.trail(), a + 1);
	}

	#[test]
	fn rollback_restores_lead_and_hides_partial_fragments() {
		let mut txw = Txw::create(tsi(), 1500, Capacity::Sqns(8), false, 255, 223, 0).unwrap();
		let pre_lead = txw.lead();

		txw.begin_apdu();
		let f0 = txw.push(b"frag0".to_vec(), 0, false);
		txw.push(b"frag1".to_vec(), 0, false);
		txw.rollback_apdu();

		assert_eq!(txw.lead(), pre_lead);
		assert!(txw.peek(f0).is_none());
	}

	#[test]
	fn retransmit_returns_none_once_the_entry_is_evicted() {
		let mut txw = Txw::create(tsi(), 1500, Capacity::Sqns(2), false, 255, 223, 0).unwrap();
		let a = txw.push(b"one".to_vec(), 0, false);
		txw.push(b"two".to_vec(), 0, false);
		txw.push(b"three".to_vec(), 0, false);
		assert!(txw.retransmit(7500, a).is_none());
	}

	#[test]
	fn build_parity_encodes_a_repair_symbol_while_the_group_is_retained() {
		let mut txw = Txw::create(tsi(), 1500, Capacity::Sqns(8), true, 4, 2, 0).unwrap();
		let first = txw.push(b"one".to_vec(), 1, false);
		txw.push(b"two".to_vec(), 1, false);

		let symbol = txw.build_parity(first, 0).unwrap();
		assert_eq!(symbol.len(), 1500);
	}

	#[test]
	fn build_parity_fails_once_the_group_is_no_longer_retained() {
		let mut txw = Txw::create(tsi(), 1500, Capacity::Sqns(2), true, 4, 2, 0).unwrap();
		let first = txw.push(b"one".to_vec(), 1, false);
		txw.push(b"two".to_vec(), 1, false);
		txw.push(b"three".to_vec(), 1, false);
		txw.push(b"four".to_vec(), 1, false);

		assert!(txw.build_parity(first, 0).is_err());
	}

	#[test]
	fn time_rate_capacity_rounds_up() {
		let txw = Txw::create(tsi(), 1000, Capacity::TimeRate { secs: 1.0, rate_bytes_per_sec: 2500 }, false, 255, 223, 0).unwrap();
		assert_eq!(txw.capacity, 3);
	}
}
