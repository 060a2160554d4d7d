use std::mem::size_of;
use std::ops::Deref;
use std::sync::Arc;

use utils::bytes::{self, Cast};

/// A reference-counted, immutable datagram.
///
/// Transmit-window entries are read by the sending thread and, on retransmission, read again by
/// whichever thread services the NAK; `Packet` is `Clone + Send + Sync` so the same allocation can
/// be held by both without copying.
#[derive(Clone)]
pub struct Packet {
	data: Arc<[u8]>,
	start: usize,
	end: usize,
}

impl Packet {
	/// Takes ownership of an assembled datagram.
	pub fn new(data: Vec<u8>) -> Self {
		let end = data.len();
		Self { data: Arc::from(data), start: 0, end }
	}

	/// The length of the remaining unread portion.
	#[inline]
	pub fn len(&self) -> usize {
		self.end - self.start
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.start == self.end
	}

	/// Returns, and advances past, the next `n` bytes.
	pub fn split_bytes(&mut self, n: usize) -> &[u8] {
		assert!(n <= self.len());

		let start = self.start;
		self.start += n;

		&self.data[start..self.start]
	}

	/// Casts the next `size_of::<T>()` bytes to `&T`, advancing past them.
	pub fn split<T: Cast>(&mut self) -> &T {
		bytes::cast(self.split_bytes(size_of::<T>()))
	}

	/// Casts the next `n * size_of::<T>()` bytes to `&[T]`, advancing past them.
	pub fn split_n<T: Cast>(&mut self, n: usize) -> &[T] {
		bytes::as_slice(self.split_bytes(n * size_of::<T>()))
	}

	/// Truncates the unread portion to `len` bytes, dropping the trailing bytes (e.g. stripping
	/// FEC parity appended past a datagram's declared length).
	pub fn truncate(&mut self, len: usize) {
		assert!(len <= self.len());
		self.end = self.start + len;
	}
}

impl Deref for Packet {
	type Target = [u8];

	#[inline]
	fn deref(&self) -> &Self::Target {
		&self.data[self.start..self.end]
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn clones_share_the_allocation_but_read_independently() {
		let mut a = Packet::new(vec![1, 2, 3, 4]);
		let mut b = a.clone();

		assert_eq!(a.split_bytes(2), &[1, 2]);
		assert_eq!(b.split_bytes(1), &[1]);
		assert_eq!(&*a, &[3, 4]);
		assert_eq!(&*b, &[2, 3, 4]);
	}
}
