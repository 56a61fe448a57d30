use bitvec::{bitvec, order::Lsb0, vec::BitVec};

/// Fixed-size bit array backing a single term.
///
/// Bit `i` lives in byte `len - 1 - i / 8` at offset `i % 8`, counting bytes
/// from the end of the storage. Snapshots copy the raw bytes, so this mapping
/// is part of the on-disk format.
#[derive(Clone, PartialEq, Eq)]
pub struct BitFilter {
    num_bits: u64,
    bits: BitVec<u8, Lsb0>,
}

impl BitFilter {
    pub fn new(num_bits: u64) -> Self {
        let byte_len = Self::byte_len_for(num_bits);
        Self {
            num_bits,
            bits: bitvec![u8, Lsb0; 0; byte_len * 8],
        }
    }

    /// Storage size in bytes for an `num_bits`-bit filter.
    pub fn byte_len_for(num_bits: u64) -> usize {
        num_bits.div_ceil(8) as usize
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn byte_len(&self) -> usize {
        self.bits.as_raw_slice().len()
    }

    fn position(&self, index: u64) -> usize {
        debug_assert!(index < self.num_bits, "bit {index} >= {}", self.num_bits);
        let byte = self.byte_len() - 1 - (index / 8) as usize;
        byte * 8 + (index % 8) as usize
    }

    /// Sets a bit and returns whether it was already set.
    pub fn set_bit(&mut self, index: u64) -> bool {
        let pos = self.position(index);
        self.bits.replace(pos, true)
    }

    pub fn test_bit(&self, index: u64) -> bool {
        self.bits[self.position(index)]
    }

    /// Sets every bit in `indices`; true only if all of them were already set.
    pub fn set_all(&mut self, indices: &[u64]) -> bool {
        let mut existed = true;
        for &index in indices {
            existed = self.set_bit(index) && existed;
        }
        existed
    }

    pub fn test_all(&self, indices: &[u64]) -> bool {
        indices.iter().all(|&index| self.test_bit(index))
    }

    pub fn clear(&mut self) {
        self.bits.fill(false);
    }

    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }

    /// Overwrites the storage with `bytes`, zero-filling anything past them.
    pub(crate) fn load_bytes(&mut self, bytes: &[u8]) {
        let raw = self.bits.as_raw_mut_slice();
        let len = bytes.len().min(raw.len());
        raw[..len].copy_from_slice(&bytes[..len]);
        raw[len..].fill(0);
    }
}

impl std::fmt::Debug for BitFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BitFilter {{ num_bits: {}, bytes: {}, ones: {} }}",
            self.num_bits,
            self.byte_len(),
            self.count_ones()
        )
    }
}
