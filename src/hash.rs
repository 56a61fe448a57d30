use murmur3::murmur3_x64_128;
use std::f64::consts::LN_2;
use std::io::Cursor;

/// Lower 64 bits of the x64 128-bit Murmur3 digest of `key`.
///
/// The lower half is the first word of the x64 variant, which keeps digests
/// identical to 64-bit Murmur3 hashers that truncate the same way.
pub(crate) fn hash_murmur64(key: &[u8], seed: u32) -> u64 {
    let mut cursor = Cursor::new(key);
    murmur3_x64_128(&mut cursor, seed)
        .expect("Failed to compute Murmur3 hash of an in-memory slice")
        as u64
}

/// Number of bits `m` needed to hold `n` items at false positive rate `fpr`.
///
/// `m = ceil(n * ln(p) / ln(1 / 2^ln2))`
pub fn optimal_bit_vector_size(n: u64, fpr: f64) -> u64 {
    let denominator = (1.0 / 2f64.powf(LN_2)).ln();
    ((n as f64 * fpr.ln()) / denominator).ceil() as u64
}

/// Number of hash functions `k` for `n` items spread over `m` bits.
///
/// The bits-per-item ratio is an integer quotient, which keeps `k` identical
/// to filters already persisted by earlier deployments. Never returns zero.
pub fn optimal_num_hashes(n: u64, m: u64) -> u64 {
    let bits_per_item = m / n;
    ((bits_per_item as f64 * LN_2).round() as u64).max(1)
}

/// Maps a digest onto a bit position of an `m`-bit filter.
#[inline]
pub fn bit_index(digest: u64, m: u64) -> u64 {
    digest % m
}

/// Derives `k` independent 64-bit digests of a key.
///
/// Every digest comes from the same Murmur3 family seeded with `0..k`, so two
/// calls with the same key always agree. The hasher is immutable once built
/// and shared by every term of a [`crate::TermWindowedFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipHasher {
    num_hashes: u64,
    num_bits: u64,
}

impl MembershipHasher {
    pub fn new(num_hashes: u64, num_bits: u64) -> Self {
        Self {
            num_hashes,
            num_bits,
        }
    }

    pub fn num_hashes(&self) -> u64 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn digests(&self, key: &[u8]) -> Vec<u64> {
        (0..self.num_hashes)
            .map(|seed| hash_murmur64(key, seed as u32))
            .collect()
    }

    /// Bit positions for `key`, one per hash function.
    pub fn bit_indices(&self, key: &[u8]) -> Vec<u64> {
        self.digests(key)
            .into_iter()
            .map(|digest| bit_index(digest, self.num_bits))
            .collect()
    }
}
