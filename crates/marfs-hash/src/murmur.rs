//! 128-bit identifiers derived with MurmurHash3 (x64_128 variant).
//!
//! Every process that places or locates data must derive the same identifier
//! for the same string, so the seed is a fixed constant shared crate-wide.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Seed used for every identifier derived from a name.
pub const KEY_SEED: u32 = 17;

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

/// A 128-bit hash value ordered high half first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    /// First (most significant for ordering) 64-bit half.
    pub hi: u64,
    /// Second 64-bit half.
    pub lo: u64,
}

impl Identifier {
    /// Identifier of an arbitrary name under [`KEY_SEED`].
    pub fn of(name: &str) -> Self {
        let (hi, lo) = hash128(name.as_bytes(), KEY_SEED);
        Self { hi, lo }
    }

    /// The largest representable identifier.
    pub const MAX: Identifier = Identifier {
        hi: u64::MAX,
        lo: u64::MAX,
    };
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}

#[inline(always)]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

#[inline(always)]
fn mix_k1(k1: u64) -> u64 {
    k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

#[inline(always)]
fn mix_k2(k2: u64) -> u64 {
    k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1)
}

/// Little-endian load of up to eight bytes into the low end of a word.
fn load_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)))
}

/// MurmurHash3 x64_128 over `input`, returning the two 64-bit halves.
///
/// Blocks are read little-endian regardless of host byte order, so results
/// agree across architectures.
pub fn hash128(input: &[u8], seed: u32) -> (u64, u64) {
    let len = input.len();
    let mut h1 = u64::from(seed);
    let mut h2 = u64::from(seed);

    let mut blocks = input.chunks_exact(16);
    for block in &mut blocks {
        let k1 = load_le(&block[..8]);
        let k2 = load_le(&block[8..]);

        h1 ^= mix_k1(k1);
        h1 = h1
            .rotate_left(27)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        h2 ^= mix_k2(k2);
        h2 = h2
            .rotate_left(31)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    let tail = blocks.remainder();
    if tail.len() > 8 {
        h2 ^= mix_k2(load_le(&tail[8..]));
    }
    if !tail.is_empty() {
        h1 ^= mix_k1(load_le(&tail[..tail.len().min(8)]));
    }

    h1 ^= len as u64;
    h2 ^= len as u64;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix64(h1);
    h2 = fmix64(h2);

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    (h1, h2)
}
