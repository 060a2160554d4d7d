use utils::bytes::Cast;
use utils::endian::{U16Be, U32Be};

/// Option extension type octet (`opt_type`). The top bit marks the last option in the chain.
pub const OPT_LENGTH: u8 = 0x00;
pub const OPT_FRAGMENT: u8 = 0x01;
pub const OPT_PARITY_PRM: u8 = 0x08;
pub const OPT_PARITY_GRP: u8 = 0x09;
pub const OPT_VAR_PKTLEN: u8 = 0x0a;
const OPT_END: u8 = 0x80;

/// Always the first option in a chain: declares the chain's total encoded length so a receiver
/// that does not understand a later option can still skip over it.
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct OptLength {
	pub opt_type: u8,
	pub opt_length: u8,
	pub total_length: U16Be,
}

impl OptLength {
	pub const LEN: usize = std::mem::size_of::<Self>();

	pub fn new(total_length: u16) -> Self {
		Self { opt_type: OPT_LENGTH, opt_length: Self::LEN as u8, total_length: total_length.into() }
	}
}

/// The 2-byte TLV prefix shared by every option after `opt_length`.
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct OptHeader {
	pub opt_type: u8,
	pub opt_length: u8,
}

impl OptHeader {
	pub fn new(opt_type: u8, body_len: u8, last: bool) -> Self {
		let opt_type = if last { opt_type | OPT_END } else { opt_type };
		Self { opt_type, opt_length: std::mem::size_of::<Self>() as u8 + body_len }
	}

	pub fn kind(self) -> u8 {
		self.opt_type & !OPT_END
	}

	pub fn is_last(self) -> bool {
		self.opt_type & OPT_END != 0
	}
}

/// APDU reassembly metadata: which APDU this TPDU belongs to, where within it, and how long the
/// whole APDU is.
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct OptFragment {
	pub reserved: u8,
	/// The sqn of the first fragment of this APDU.
	pub first_sqn: U32Be,
	/// This fragment's byte offset within the APDU.
	pub fragment_offset: U32Be,
	/// The total length of the APDU, in bytes.
	pub apdu_length: U32Be,
}

/// Announces FEC transmission-group parameters, carried on SPM.
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct OptParityPrm {
	pub reserved: u8,
	/// Transmission group size (`k`), and `n - k` parity count encoded as two bytes for clarity.
	pub group_size: u8,
	pub parity_count: u8,
}

/// Marks an ODATA/RDATA payload as a parity symbol belonging to the transmission group starting
/// at `tg_sqn`.
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct OptParityGrp {
	pub reserved: u8,
	pub tg_sqn: U32Be,
}

/// Records a TPDU's true payload length when FEC operates over a padded, fixed transmission-group
/// symbol size (`use_varpkt_len`).
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct OptVarPktlen {
	pub reserved: u8,
	pub data_bytes: U16Be,
}
