use utils::bytes::Cast;
use utils::endian::U32Be;

/// The fixed part of an ODATA/RDATA payload, preceding the TSDU (and any option chain).
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct Data {
	pub sqn: U32Be,
	/// The trailing edge of the source's transmit window at the time this packet was sent; lets
	/// receivers advance their own trail without waiting for a dedicated SPM.
	pub trail: U32Be,
}
