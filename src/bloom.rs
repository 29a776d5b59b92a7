//! Split-block bloom filter used as a hash-join pre-probe.
//!
//! Shape is grounded on the `datasketches` port's `BloomFilter`/
//! `BloomFilterBuilder` split (`contains`/`insert`/`contains_and_insert`
//! over a `Vec<u64>` bit array), adapted to the block-striped layout and
//! batched `contains_many` spec'd for join pre-probing, and to
//! `rustc-hash`-derived salts instead of a generic hasher so the join path
//! shares one hash family end to end (join key hash → bloom salts → hash
//! table key).

use rustc_hash::FxHasher;
use std::hash::Hasher;

/// Maximum distinct keys the filter will index; builds above this are
/// skipped and the filter reports every probe as a possible match (safe,
/// just useless).
pub const MAX_BUILD_KEYS: u64 = 16_000_000;

const BLOCK_WORDS: usize = 8;
const BLOCK_BITS: usize = BLOCK_WORDS * 64;

/// Per-block salt constants, following the standard split-block bloom
/// filter construction (each salt selects one bit within its 64-bit word).
const SALTS: [u32; 8] = [
    0x4745_9f31,
    0x1de3_e8c5,
    0x3aa2_b8ea,
    0xf91b_0e5c,
    0x2b3f_baf7,
    0x6c1e_1d53,
    0x9a2e_9a41,
    0x7d0a_3c19,
];

/// A split-block bloom filter over pre-hashed 64-bit keys.
///
/// Disabled (always-possible-match) once the estimated key count exceeds
/// [`MAX_BUILD_KEYS`], per spec.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    blocks: Vec<[u64; BLOCK_WORDS]>,
    num_blocks: usize,
    disabled: bool,
}

impl BloomFilter {
    /// Build an empty filter sized for `estimated_keys` distinct entries.
    ///
    /// Capacity is chosen from a small set of tiers so small builds don't
    /// pay for a filter sized for millions of keys.
    #[must_use]
    pub fn with_capacity(estimated_keys: u64) -> Self {
        if estimated_keys > MAX_BUILD_KEYS {
            return Self {
                blocks: Vec::new(),
                num_blocks: 0,
                disabled: true,
            };
        }

        let target_bits = tiered_bits(estimated_keys);
        let num_blocks = (target_bits / BLOCK_BITS).max(1);
        Self {
            blocks: vec![[0u64; BLOCK_WORDS]; num_blocks],
            num_blocks,
            disabled: false,
        }
    }

    /// True if the filter was disabled due to an oversized build.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Insert a pre-hashed key.
    pub fn insert(&mut self, hash: u64) {
        if self.disabled {
            return;
        }
        let (block_idx, bit_hash) = self.locate(hash);
        let block = &mut self.blocks[block_idx];
        for (word, salt) in block.iter_mut().zip(SALTS.iter()) {
            let bit = salted_bit(bit_hash, *salt);
            *word |= 1u64 << bit;
        }
    }

    /// True if `hash` may be present. Never false for a key that was
    /// actually inserted (zero false negatives); may be true for a key
    /// that was never inserted (false positive).
    #[must_use]
    pub fn contains(&self, hash: u64) -> bool {
        if self.disabled {
            return true;
        }
        let (block_idx, bit_hash) = self.locate(hash);
        let block = &self.blocks[block_idx];
        block
            .iter()
            .zip(SALTS.iter())
            .all(|(word, salt)| (*word >> salted_bit(bit_hash, *salt)) & 1 == 1)
    }

    /// Probe many hashes at once, returning one bit per input in the same
    /// order. Used by the join probe side to build a selection vector of
    /// possibly-matching rows before running the hash table lookup.
    #[must_use]
    pub fn contains_many(&self, hashes: &[u64]) -> Vec<bool> {
        hashes.iter().map(|h| self.contains(*h)).collect()
    }

    fn locate(&self, hash: u64) -> (usize, u64) {
        // Two independent derivations from one 64-bit hash: the high bits
        // pick the block, the low bits (re-mixed) pick bits within it.
        let block_idx = (hash >> 32) as usize % self.num_blocks;
        let mut hasher = FxHasher::default();
        hasher.write_u64(hash);
        hasher.write_u8(0xA5);
        (block_idx, hasher.finish())
    }
}

fn salted_bit(hash: u64, salt: u32) -> u32 {
    let mixed = hash.wrapping_mul(u64::from(salt));
    ((mixed >> 58) & 63) as u32
}

fn tiered_bits(estimated_keys: u64) -> usize {
    const TIERS: [(u64, usize); 4] = [
        (1_000, 8 * 1024),
        (100_000, 512 * 1024),
        (10_000_000, 8 * 1024 * 1024),
        (u64::MAX, 128 * 1024 * 1024),
    ];
    TIERS
        .iter()
        .find(|(ceiling, _)| estimated_keys <= *ceiling)
        .map_or(TIERS[3].1, |(_, bits)| *bits)
}

/// Derive a 64-bit hash for use as both a bloom filter key and a hash
/// table key, from a row's already-computed join-key hash. Kept as a
/// separate function so callers that hash a row once can feed the same
/// value to both structures.
#[must_use]
pub fn hash_u64(value: u64) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(value);
    hasher.finish()
}
