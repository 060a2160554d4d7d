use std::fmt;

/// Transport Session Identifier: a 6-byte Global Source Id paired with a 2-byte source port.
/// Uniquely names a sender; immutable after creation.
///
/// On the wire these fields live directly in the packet header (see `packet::Header`); `Tsi` is
/// the plain value type used once the header has been cast, so it can be used as a `HashMap` key
/// without any of the wire struct's alignment constraints.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tsi {
	gsi: [u8; 6],
	port: u16,
}

impl Tsi {
	pub fn new(gsi: [u8; 6], port: u16) -> Self {
		Self { gsi, port }
	}

	/// Derives a GSI the way the original implementation's `pgm_gsi_create_from_hostname` does in
	/// spirit: low-entropy bytes unique enough within a single host's process lifetime. `entropy`
	/// is expected to come from a counter or random source, not the wall clock (see `pgm::info`).
	pub fn gsi_from_entropy(entropy: u64) -> [u8; 6] {
		entropy.to_be_bytes()[2..8].try_into().unwrap()
	}

	pub fn gsi(&self) -> [u8; 6] {
		self.gsi
	}

	pub fn port(&self) -> u16 {
		self.port
	}
}

impl fmt::Debug for Tsi {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let gsi = self.gsi;
		write!(
			f,
			"{:02x}.{:02x}.{:02x}.{:02x}.{:02x}.{:02x}.{}",
			gsi[0], gsi[1], gsi[2], gsi[3], gsi[4], gsi[5], self.port
		)
	}
}

impl fmt::Display for Tsi {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_fields() {
		let tsi = Tsi::new([1, 2, 3, 4, 5, 6], 7500);
		assert_eq!(tsi.gsi(), [1, 2, 3, 4, 5, 6]);
		assert_eq!(tsi.port(), 7500);
	}

	#[test]
	fn equal_tsis_hash_equal() {
		use std::collections::hash_map::DefaultHasher;
		use std::hash::{Hash, Hasher};

		let a = Tsi::new([9; 6], 42);
		let b = Tsi::new([9; 6], 42);

		let hash = |t: &Tsi| {
			let mut h = DefaultHasher::new();
			t.hash(&mut h);
			h.finish()
		};

		assert_eq!(a, b);
		assert_eq!(hash(&a), hash(&b));
	}
}
