use utils::bytes::Cast;
use utils::endian::U16Be;

/// The 16-byte header common to every PGM packet type.
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct Header {
	pub sport: U16Be,
	pub dport: U16Be,
	pub kind: Type,
	pub options: Options,
	/// RFC 1071 checksum bytes (see `checksum`). Stored as raw bytes, not `U16Be`: the internet
	/// checksum algorithm's native-endian-pairing trick makes it endian-independent only as long
	/// as the bytes are moved verbatim, never reinterpreted as a big-endian integer.
	pub checksum: [u8; 2],
	pub gsi: [u8; 6],
	/// TSDU length for ODATA/RDATA; otherwise padding/reserved per type.
	pub tsdu_length: U16Be,
}

/// The PGM packet type octet (`pgm_type`).
#[derive(Clone, Copy, PartialEq, Eq, Cast)]
#[repr(transparent)]
pub struct Type(pub u8);

impl Type {
	pub const SPM: Self = Self(0x00);
	pub const POLL: Self = Self(0x01);
	pub const POLR: Self = Self(0x02);
	pub const ODATA: Self = Self(0x04);
	pub const RDATA: Self = Self(0x05);
	pub const NAK: Self = Self(0x08);
	pub const NNAK: Self = Self(0x09);
	pub const NCF: Self = Self(0x0a);
	pub const SPMR: Self = Self(0x0c);
}

impl std::fmt::Debug for Type {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match *self {
			Self::SPM => "SPM",
			Self::POLL => "POLL",
			Self::POLR => "POLR",
			Self::ODATA => "ODATA",
			Self::RDATA => "RDATA",
			Self::NAK => "NAK",
			Self::NNAK => "NNAK",
			Self::NCF => "NCF",
			Self::SPMR => "SPMR",
			_ => return write!(f, "Type({:#x})", self.0),
		};
		f.write_str(name)
	}
}

/// The `pgm_options` octet: the low bit marks the presence of an option extension chain.
#[derive(Clone, Copy, PartialEq, Eq, Cast)]
#[repr(transparent)]
pub struct Options(pub u8);

impl Options {
	pub const NONE: Self = Self(0);
	const PRESENT: u8 = 0x01;
	const NETWORK: u8 = 0x02;

	pub fn with_present(mut self, present: bool) -> Self {
		self.0 = if present { self.0 | Self::PRESENT } else { self.0 & !Self::PRESENT };
		self
	}

	pub fn has_options(self) -> bool {
		self.0 & Self::PRESENT != 0
	}

	pub fn with_network_significant(mut self, yes: bool) -> Self {
		self.0 = if yes { self.0 | Self::NETWORK } else { self.0 & !Self::NETWORK };
		self
	}

	pub fn has_network_significant_option(self) -> bool {
		self.0 & Self::NETWORK != 0
	}
}

/// Address Family Indicator values used by NLA fields (RFC 1700 assigned numbers, as the original
/// implementation uses directly).
#[derive(Clone, Copy, PartialEq, Eq, Cast, Debug)]
#[repr(transparent)]
pub struct Afi(pub U16Be);

impl Afi {
	pub const IP: u16 = 1;
	pub const IP6: u16 = 2;
}

pub const HEADER_LEN: usize = std::mem::size_of::<Header>();

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_is_sixteen_bytes() {
		assert_eq!(HEADER_LEN, 16);
	}

	#[test]
	fn options_present_bit_round_trips() {
		let opts = Options::NONE.with_present(true);
		assert!(opts.has_options());
		assert!(!opts.has_network_significant_option());
	}
}
