use utils::bytes::Cast;
use utils::endian::U32Be;

/// The fixed part of an SPM (Source Path Message) payload, preceding its variable-length NLA.
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct Spm {
	pub sqn: U32Be,
	/// The trailing edge of the source's transmit window at the time this SPM was sent.
	pub trail: U32Be,
	/// The leading edge of the source's transmit window.
	pub lead: U32Be,
}
