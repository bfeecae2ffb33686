//! Fixed-size Bloom filter over fingerprint hex strings.
//!
//! Membership probes use double hashing: two FNV-1a variants combined as
//! `h1 + i·h2` for each of the `k` probes. The filter never reports a false
//! negative; the false-positive rate rises with the fill ratio.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomFilter {
    bits: Vec<u64>,
    /// Total bit positions, fixed at construction.
    num_bits: usize,
    /// Number of probes per key.
    num_hashes: u32,
    /// Count of inserted keys, for fill-ratio reporting.
    inserted: usize,
}

impl BloomFilter {
    /// `num_bits` is rounded up to a multiple of 64.
    pub fn new(num_bits: usize, num_hashes: u32) -> Self {
        let words = num_bits.max(64).div_ceil(64);
        Self {
            bits: vec![0u64; words],
            num_bits: words * 64,
            num_hashes: num_hashes.max(1),
            inserted: 0,
        }
    }

    pub fn insert(&mut self, key: &str) {
        for i in 0..self.num_hashes {
            let pos = self.probe(key, i);
            self.bits[pos / 64] |= 1u64 << (pos % 64);
        }
        self.inserted += 1;
    }

    /// `false` is definitive; `true` may be a false positive.
    pub fn contains(&self, key: &str) -> bool {
        (0..self.num_hashes).all(|i| {
            let pos = self.probe(key, i);
            self.bits[pos / 64] & (1u64 << (pos % 64)) != 0
        })
    }

    /// Fraction of bit positions currently set.
    pub fn fill_ratio(&self) -> f64 {
        let set: u32 = self.bits.iter().map(|w| w.count_ones()).sum();
        set as f64 / self.num_bits as f64
    }

    pub fn inserted(&self) -> usize {
        self.inserted
    }

    fn probe(&self, key: &str, i: u32) -> usize {
        let h1 = fnv1a(key.as_bytes(), 0xcbf2_9ce4_8422_2325);
        let h2 = fnv1a(key.as_bytes(), 0x8422_2325_cbf2_9ce4) | 1;
        let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (combined % self.num_bits as u64) as usize
    }
}

/// FNV-1a with a caller-supplied basis so two independent hash streams can be
/// derived from the same bytes.
fn fnv1a(bytes: &[u8], basis: u64) -> u64 {
    let mut hash = basis;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
