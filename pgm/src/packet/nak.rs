use utils::bytes::Cast;
use utils::endian::U32Be;

/// The fixed part of a NAK/NCF/NNAK payload, preceding the source and group NLAs.
#[derive(Clone, Copy, Cast)]
#[repr(C, packed)]
pub struct Nak {
	pub sqn: U32Be,
}
