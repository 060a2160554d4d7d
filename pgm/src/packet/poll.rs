use utils::bytes::Cast;
use utils::endian::{U16Be, U32Be};

/// The fixed part of a POLL payload, preceding its NLA.
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct Poll {
	pub sqn: U32Be,
	pub round: U16Be,
	pub s_type: U16Be,
}

/// The fixed part of a POLL's backoff parameters, following its NLA.
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct PollBackoff {
	pub bo_ivl: U32Be,
	pub rand: U32Be,
	pub mask: U32Be,
}

/// POLR (poll response) payload: carries no NLA.
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct Polr {
	pub sqn: U32Be,
	pub round: U16Be,
	pub reserved: U16Be,
}
