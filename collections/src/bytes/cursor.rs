use utils::bytes::{self, Cast};

/// A cursor over a mutable byteslice, used to lay out packet headers and payloads in place.
pub struct Cursor<'a> {
	/// The underlying buffer
	slice: &'a mut [u8],
	/// A pointer within `slice`
	pivot: &'a mut usize,
}

impl<'a> Cursor<'a> {
	/// Runs `f` over a `Vec`'s spare capacity, then truncates the `Vec` to the bytes actually
	/// written. Used to assemble an outgoing datagram directly into its send buffer.
	pub fn vec<X>(vec: &mut Vec<u8>, f: impl FnOnce(Cursor) -> X) -> X {
		let mut ptr = vec.as_ptr() as usize;
		let t = f(Cursor { slice: vec, pivot: &mut ptr });
		vec.truncate(ptr - vec.as_ptr() as usize);
		t
	}

	/// Pushes an object to the buffer, advancing the pivot.
	pub fn push<T: Cast + ?Sized>(self, t: &T) -> Self {
		let bytes = bytes::as_slice(t);

		let (l, r) = self.slice.split_at_mut(bytes.len());
		*self.pivot = r.as_ptr() as usize;

		l.copy_from_slice(bytes);

		Self { slice: r, pivot: self.pivot }
	}
}
