//! Reed-Solomon forward error correction over GF(2^8), systematic encoding with a Vandermonde
//! generator matrix (spec §4.5). Wraps `reed_solomon_erasure` rather than hand-rolling the field
//! arithmetic, matching the construction `_pgm_rs_create`/`_pgm_rs_encode` describe in the
//! original implementation's `reed_solomon.h` without its body being available to port from.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::{Error, Result};

/// Default code: `PGM_RS_DEFAULT_N` paired with the largest `k` the original implementation's
/// symbol size of a byte permits (`n ≤ 255`).
pub const DEFAULT_N: usize = 255;
pub const DEFAULT_K: usize = 223;

/// An `RS(n, k)` code over `GF(2^8)`: `k` data shards, `n - k` parity shards.
pub struct Rs {
	n: usize,
	k: usize,
	coder: ReedSolomon,
}

impl Rs {
	/// Validates `(n, k)` per spec §3's endpoint invariants: `k` a power of two in `[2, 128]`,
	/// `n` in `[k+1, 255]`, and `h = n - k` implies at least one recoverable symbol when `k > 223`.
	pub fn new(n: usize, k: usize) -> Result<Self> {
		if !(2..=128).contains(&k) || !k.is_power_of_two() {
			return Err(Error::InvalidArgument(format!("k={k} must be a power of two in [2,128]")));
		}
		if !(k + 1..=255).contains(&n) {
			return Err(Error::InvalidArgument(format!("n={n} must be in [k+1,255]")));
		}
		let h = n - k;
		if k > 223 && (h * 223) / k < 1 {
			return Err(Error::InvalidArgument(format!("h={h} too small for k={k}")));
		}

		let coder = ReedSolomon::new(k, h).map_err(|e| Error::InvalidArgument(e.to_string()))?;
		Ok(Self { n, k, coder })
	}

	pub fn n(&self) -> usize {
		self.n
	}

	pub fn k(&self) -> usize {
		self.k
	}

	/// Writes the `parity_index`-th parity symbol (`0 ≤ parity_index < n-k`) across `data_blocks`
	/// into `out_block`. All blocks must share a common length (the TPDU's TSDU length); `encode`
	/// runs `L` independent `GF(2^8)` instances, one per byte offset.
	pub fn encode(&self, data_blocks: &[&[u8]], parity_index: usize, out_block: &mut [u8]) -> Result<()> {
		if data_blocks.len() != self.k {
			return Err(Error::InvalidArgument(format!("expected {} data blocks, got {}", self.k, data_blocks.len())));
		}
		if parity_index >= self.n - self.k {
			return Err(Error::InvalidArgument(format!("parity_index {parity_index} out of range")));
		}

		let len = out_block.len();
		let mut shards: Vec<Vec<u8>> = data_blocks.iter().map(|b| b.to_vec()).collect();
		shards.resize_with(self.n, || vec![0u8; len]);

		self.coder.encode(&mut shards).map_err(|e| Error::Protocol(e.to_string()))?;
		out_block.copy_from_slice(&shards[self.k + parity_index]);
		Ok(())
	}

	/// Recovers erased positions in `blocks[n]` in place, where erased slots carry parity symbols
	/// from the same transmission group (inline repair: the source replaced a lost data symbol's
	/// slot with a parity symbol it transmitted instead).
	pub fn decode_parity_inline(&self, blocks: &mut [Vec<u8>], erasures: &[usize]) -> Result<()> {
		if blocks.len() != self.n {
			return Err(Error::InvalidArgument(format!("expected {} blocks, got {}", self.n, blocks.len())));
		}

		let mut shards: Vec<Option<Vec<u8>>> = blocks.iter().cloned().map(Some).collect();
		for &e in erasures {
			if e >= self.n {
				return Err(Error::InvalidArgument(format!("erasure index {e} out of range")));
			}
			shards[e] = None;
		}

		self.coder.reconstruct(&mut shards).map_err(|e| Error::Protocol(e.to_string()))?;

		for (slot, shard) in blocks.iter_mut().zip(shards) {
			*slot = shard.expect("reconstruct fills every shard on success");
		}
		Ok(())
	}

	/// Recovers missing data blocks given separately carried parity blocks (on-demand repair: the
	/// receiver requested and received explicit parity packets rather than inline substitutes).
	pub fn decode_parity_appended(&self, data_blocks: &mut [Vec<u8>], parity_blocks: &[Vec<u8>], erasures: &[usize]) -> Result<()> {
		if data_blocks.len() != self.k {
			return Err(Error::InvalidArgument(format!("expected {} data blocks, got {}", self.k, data_blocks.len())));
		}
		if parity_blocks.len() > self.n - self.k {
			return Err(Error::InvalidArgument("more parity blocks than the code provides".into()));
		}

		let mut shards: Vec<Option<Vec<u8>>> = data_blocks.iter().cloned().map(Some).collect();
		for &e in erasures {
			if e >= self.k {
				return Err(Error::InvalidArgument(format!("erasure index {e} out of range")));
			}
			shards[e] = None;
		}
		shards.extend(parity_blocks.iter().cloned().map(Some));
		shards.resize(self.n, None);

		self.coder.reconstruct_data(&mut shards).map_err(|e| Error::Protocol(e.to_string()))?;

		for (slot, shard) in data_blocks.iter_mut().zip(shards) {
			*slot = shard.expect("reconstruct_data fills every data shard on success");
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_non_power_of_two_k() {
		assert!(Rs::new(10, 3).is_err());
	}

	#[test]
	fn rejects_n_not_greater_than_k() {
		assert!(Rs::new(4, 4).is_err());
	}

	#[test]
	fn small_code_recovers_erased_data_symbols() {
		let rs = Rs::new(5, 2).unwrap();
		let a = b"AAAA".to_vec();
		let b = b"BBBB".to_vec();

		let mut parity = vec![0u8; 4];
		rs.encode(&[&a, &b], 0, &mut parity).unwrap();

		let mut blocks = vec![vec![0u8; 4], b.clone(), parity, vec![0u8; 4], vec![0u8; 4]];
		blocks[0] = a.clone();
		rs.decode_parity_inline(&mut blocks, &[3, 4]).unwrap();
		assert_eq!(blocks[0], a);
		assert_eq!(blocks[1], b);
	}

	#[test]
	fn appended_parity_recovers_missing_data_block() {
		let rs = Rs::new(5, 2).unwrap();
		let a = b"hello world!".to_vec();
		let b = b"goodbye moon".to_vec();

		let mut p0 = vec![0u8; a.len()];
		let mut p1 = vec![0u8; a.len()];
		rs.encode(&[&a, &b], 0, &mut p0).unwrap();
		rs.encode(&[&a, &b], 1, &mut p1).unwrap();

		let mut data = vec![vec![0u8; a.len()], b.clone()];
		rs.decode_parity_appended(&mut data, &[p0, p1], &[0]).unwrap();
		assert_eq!(data[0], a);
	}

	#[test]
	fn default_code_matches_the_original_implementations_constant() {
		assert_eq!(DEFAULT_N, 255);
		assert_eq!(DEFAULT_K, 223);
	}
}
