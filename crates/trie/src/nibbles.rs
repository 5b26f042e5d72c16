// Copyright 2024 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::{fmt, iter};

use crate::Error;

/// The number of nibbles that fit into a single word.
pub const MAX_NIBBLES: usize = 64;

/// A path of up to [MAX_NIBBLES] nibbles packed into a single word.
///
/// The first nibble of the path is the most significant one, i.e. the path `a, b, c`
/// is stored as `count == 3` and `packed == 0xabc`. `count` is authoritative and all
/// bits above `4 * count` are zero, which makes the derived equality a path equality.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Nibbles {
    count: usize,
    packed: U256,
}

/// Returns a word with the lowest `count` nibbles set.
fn mask(count: usize) -> U256 {
    if count >= MAX_NIBBLES {
        U256::MAX
    } else {
        (U256::from(1) << (4 * count)) - U256::from(1)
    }
}

impl Nibbles {
    /// The empty path.
    pub const EMPTY: Nibbles = Nibbles {
        count: 0,
        packed: U256::ZERO,
    };

    /// Creates a path from its length and packed representation.
    pub fn new(count: usize, packed: U256) -> Result<Self, Error> {
        if count > MAX_NIBBLES {
            return Err(Error::PathTooLong(count));
        }
        if packed & !mask(count) != U256::ZERO {
            return Err(Error::InvariantViolation(
                "nibble path has bits beyond its length",
            ));
        }
        Ok(Self { count, packed })
    }

    /// Converts up to 32 bytes into a path of two nibbles per byte.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() > MAX_NIBBLES / 2 {
            return Err(Error::PathTooLong(2 * bytes.len()));
        }
        Ok(Self {
            count: 2 * bytes.len(),
            packed: U256::from_be_slice(bytes),
        })
    }

    /// Creates a path consisting of the single nibble `nib`.
    pub fn single(nib: u8) -> Self {
        Self {
            count: 1,
            packed: U256::from(nib & 0xf),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn packed(&self) -> U256 {
        self.packed
    }

    /// Returns the nibble at position `index`, counted from the front of the path.
    /// Positions beyond the end of the path read as zero.
    pub fn get(&self, index: usize) -> u8 {
        if index >= self.count {
            return 0;
        }
        let shift = 4 * (self.count - 1 - index);
        (self.packed >> shift).byte(0) & 0xf
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.count).map(|i| self.get(i))
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.iter().collect()
    }

    /// Splits off the most significant nibble. Returns `None` for the empty path.
    pub fn split_first(&self) -> Option<(u8, Nibbles)> {
        if self.is_empty() {
            return None;
        }
        Some((self.get(0), self.truncate(1)))
    }

    /// Drops the first `n` nibbles of the path.
    pub fn truncate(&self, n: usize) -> Nibbles {
        let count = self.count.saturating_sub(n);
        Nibbles {
            count,
            packed: self.packed & mask(count),
        }
    }

    /// Keeps only the first `n` nibbles of the path.
    pub fn prefix(&self, n: usize) -> Nibbles {
        let n = n.min(self.count);
        if n == 0 {
            return Nibbles::EMPTY;
        }
        Nibbles {
            count: n,
            packed: self.packed >> (4 * (self.count - n)),
        }
    }

    /// Returns whether `prefix` matches the first nibbles of this path.
    pub fn starts_with(&self, prefix: &Nibbles) -> bool {
        prefix.count <= self.count && self.prefix(prefix.count) == *prefix
    }

    /// Returns the length of the longest common prefix of both paths.
    pub fn common_prefix_len(&self, other: &Nibbles) -> usize {
        iter::zip(self.iter(), other.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Splits both paths at their longest common prefix, returning the common part and
    /// the remainders of `self` and `other`.
    pub fn split_common_prefix(&self, other: &Nibbles) -> (Nibbles, Nibbles, Nibbles) {
        let common_len = self.common_prefix_len(other);
        (
            self.prefix(common_len),
            self.truncate(common_len),
            other.truncate(common_len),
        )
    }

    /// Concatenates `other` to the end of this path.
    pub fn merge(&self, other: &Nibbles) -> Result<Nibbles, Error> {
        let count = self.count + other.count;
        if count > MAX_NIBBLES {
            return Err(Error::PathTooLong(count));
        }
        if self.is_empty() {
            return Ok(*other);
        }
        Ok(Nibbles {
            count,
            packed: (self.packed << (4 * other.count)) | other.packed,
        })
    }

    /// Returns the hex-prefix encoding of the path.
    ///
    /// The first nibble of the encoding carries the flags: bit 0 is set for odd lengths
    /// and bit 1 for leaves. Odd paths put their first nibble next to the flags, even
    /// paths pad with a zero nibble.
    pub fn to_hex_prefix(&self, is_leaf: bool) -> Vec<u8> {
        let nibs = self.to_vec();
        let mut nibs = nibs.as_slice();
        let mut prefix = (is_leaf as u8) * 0x20;
        if nibs.len() % 2 != 0 {
            prefix += 0x10 + nibs[0];
            nibs = &nibs[1..];
        }
        iter::once(prefix)
            .chain(nibs.chunks_exact(2).map(|byte| (byte[0] << 4) + byte[1]))
            .collect()
    }
}

impl fmt::Display for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for nib in self.iter() {
            write!(f, "{:x}", nib)?;
        }
        Ok(())
    }
}
