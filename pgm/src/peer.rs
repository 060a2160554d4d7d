//! The peer table: remote sources (TSIs) mapped to receive state (spec §3 "Peer", §9 "Mixed
//! ownership via reference counting"). Generalizes the teacher's `collections::map::Map` — a
//! fixed-`N`, `ahash`-hashed open-addressed table keyed by a `Key` trait — to an unbounded,
//! runtime-growable table, since the number of distinct senders a receiver hears from is not
//! known at compile time the way the teacher's peer-count ceilings are.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use ahash::RandomState;

use crate::fec::Rs;
use crate::packet::Fragment;
use crate::rxw::Rxw;
use crate::tsi::Tsi;

/// An APDU fragment sequence currently being reassembled, keyed by its first sqn (spec §3's
/// "fragmentation" note: a TSDU larger than one TPDU is split across consecutive sqns, reassembled
/// in delivery order).
struct Reassembly {
	first_sqn: u32,
	apdu_length: u32,
	buffer: Vec<u8>,
}

/// A remote source this endpoint has heard from. Lifetime: created on first reception from a new
/// TSI, destroyed when its refcount drops to zero (last window eviction, no outstanding hold) —
/// modeled here as "removed from the table and all `Arc` handles dropped" (spec §3, design note
/// §9's "owning table that hands out short-lived borrows").
pub struct Peer {
	pub tsi: Tsi,
	pub last_heard: std::time::Instant,
	pub nla: Option<std::net::IpAddr>,
	pub rxw: Rxw,
	/// Fragment metadata recorded at reception time, consulted once the sqn drains from `rxw` in
	/// order. Not stored in `Rxw` itself — the window only tracks delivery order, not APDU shape.
	fragments: HashMap<u32, Fragment>,
	reassembly: Option<Reassembly>,
}

impl Peer {
	pub fn new(tsi: Tsi, rxw_capacity: usize, initial_sqn: u32, rs: Option<Rs>, k: usize) -> Self {
		Self {
			tsi,
			last_heard: std::time::Instant::now(),
			nla: None,
			rxw: Rxw::new(rxw_capacity, initial_sqn, rs, k),
			fragments: HashMap::new(),
			reassembly: None,
		}
	}

	pub fn touch(&mut self) {
		self.last_heard = std::time::Instant::now();
	}

	/// Records a received packet's fragment metadata for later consultation, if it carried any.
	pub fn note_fragment(&mut self, sqn: u32, fragment: Option<Fragment>) {
		if let Some(fragment) = fragment {
			self.fragments.insert(sqn, fragment);
		}
	}

	/// Feeds one in-order delivered sqn's payload through reassembly. Returns a completed APDU
	/// once its final fragment arrives; a non-fragmented packet completes immediately. `None`
	/// payloads (a sqn the window gave up on) abandon any reassembly in progress, since a gap
	/// inside an APDU can never be filled in.
	pub fn reassemble(&mut self, sqn: u32, payload: Option<Vec<u8>>) -> Option<Vec<u8>> {
		let fragment = self.fragments.remove(&sqn);

		let Some(payload) = payload else {
			self.reassembly = None;
			return None;
		};

		let Some(fragment) = fragment else {
			self.reassembly = None;
			return Some(payload);
		};

		let assembly = self.reassembly.get_or_insert_with(|| Reassembly { first_sqn: fragment.first_sqn, apdu_length: fragment.apdu_length, buffer: Vec::new() });

		if assembly.first_sqn != fragment.first_sqn {
			*assembly = Reassembly { first_sqn: fragment.first_sqn, apdu_length: fragment.apdu_length, buffer: Vec::new() };
		}

		assembly.buffer.extend_from_slice(&payload);

		if assembly.buffer.len() as u32 >= assembly.apdu_length {
			let Reassembly { buffer, .. } = self.reassembly.take().unwrap();
			Some(buffer)
		} else {
			None
		}
	}
}

/// Guarded by a reader/writer lock: readers are the delivery path looking up an existing peer,
/// writers are peer insert/evict (spec §5's "Shared state").
pub struct PeerTable {
	peers: RwLock<HashMap<Tsi, Arc<Mutex<Peer>>, RandomState>>,
}

impl PeerTable {
	pub fn new() -> Self {
		Self { peers: RwLock::new(HashMap::with_hasher(RandomState::new())) }
	}

	/// Returns the existing peer for `tsi`, or creates one via `make` and inserts it.
	pub fn get_or_insert(&self, tsi: Tsi, make: impl FnOnce() -> Peer) -> Arc<Mutex<Peer>> {
		if let Some(peer) = self.peers.read().unwrap().get(&tsi) {
			return peer.clone();
		}

		let mut peers = self.peers.write().unwrap();
		peers.entry(tsi).or_insert_with(|| Arc::new(Mutex::new(make()))).clone()
	}

	pub fn get(&self, tsi: &Tsi) -> Option<Arc<Mutex<Peer>>> {
		self.peers.read().unwrap().get(tsi).cloned()
	}

	pub fn remove(&self, tsi: &Tsi) {
		self.peers.write().unwrap().remove(tsi);
	}

	/// Snapshots every currently-known peer, for a timer sweep that needs to visit each one
	/// (spec §4.6's NAK-generation pass) without holding the table lock while it does.
	pub fn enumerate(&self) -> Vec<Arc<Mutex<Peer>>> {
		self.peers.read().unwrap().values().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.peers.read().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Default for PeerTable {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tsi(port: u16) -> Tsi {
		Tsi::new([1, 2, 3, 4, 5, 6], port)
	}

	#[test]
	fn get_or_insert_returns_the_same_peer_on_repeat_lookup() {
		let table = PeerTable::new();
		let a = table.get_or_insert(tsi(1), || Peer::new(tsi(1), 16, 0, None, 1));
		let b = table.get_or_insert(tsi(1), || panic!("should not construct twice"));
		assert!(Arc::ptr_eq(&a, &b));
	}

	#[test]
	fn remove_drops_the_entry() {
		let table = PeerTable::new();
		table.get_or_insert(tsi(1), || Peer::new(tsi(1), 16, 0, None, 1));
		table.remove(&tsi(1));
		assert!(table.get(&tsi(1)).is_none());
	}

	#[test]
	fn unfragmented_payload_reassembles_immediately() {
		let mut peer = Peer::new(tsi(1), 16, 0, None, 1);
		peer.note_fragment(0, None);
		assert_eq!(peer.reassemble(0, Some(b"whole".to_vec())), Some(b"whole".to_vec()));
	}

	#[test]
	fn fragments_accumulate_until_the_apdu_length_is_reached() {
		let mut peer = Peer::new(tsi(1), 16, 0, None, 1);
		let fragment = Fragment { first_sqn: 0, offset: 0, apdu_length: 8 };

		peer.note_fragment(0, Some(fragment));
		assert_eq!(peer.reassemble(0, Some(b"abcd".to_vec())), None);

		peer.note_fragment(1, Some(Fragment { offset: 4, ..fragment }));
		assert_eq!(peer.reassemble(1, Some(b"efgh".to_vec())), Some(b"abcdefgh".to_vec()));
	}

	#[test]
	fn a_lost_fragment_abandons_the_apdu_in_progress() {
		let mut peer = Peer::new(tsi(1), 16, 0, None, 1);
		let fragment = Fragment { first_sqn: 0, offset: 0, apdu_length: 8 };

		peer.note_fragment(0, Some(fragment));
		peer.reassemble(0, Some(b"abcd".to_vec()));

		peer.note_fragment(1, Some(Fragment { offset: 4, ..fragment }));
		assert_eq!(peer.reassemble(1, None), None);
	}
}
