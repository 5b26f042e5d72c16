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

use alloy_primitives::{B256, U256};

use crate::Error;

/// Index of a word inside a [TrieArena].
pub type Ptr = usize;

/// The pointer to the empty node. Word 0 of every arena holds the empty tag, so this
/// pointer always decodes to an empty trie.
pub const NULL_PTR: Ptr = 0;

/// Append-only storage for trie nodes and their payloads.
///
/// Words are never removed or compacted. Old roots therefore remain valid for as long
/// as the arena lives, which is what allows the journal to restore a previous root by
/// simply switching back to its pointer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrieArena {
    words: Vec<U256>,
}

impl Default for TrieArena {
    fn default() -> Self {
        Self::new()
    }
}

impl TrieArena {
    /// Creates an arena containing only the empty node at [NULL_PTR].
    pub fn new() -> Self {
        Self {
            words: vec![U256::ZERO],
        }
    }

    /// Returns the next free pointer.
    #[inline]
    pub fn size(&self) -> Ptr {
        self.words.len()
    }

    /// Writes `word` at [TrieArena::size] and returns its pointer.
    #[inline]
    pub fn append(&mut self, word: U256) -> Ptr {
        let ptr = self.words.len();
        self.words.push(word);
        ptr
    }

    /// Appends all `words` contiguously and returns the pointer to the first one.
    pub fn append_slice(&mut self, words: &[U256]) -> Ptr {
        let ptr = self.words.len();
        self.words.extend_from_slice(words);
        ptr
    }

    #[inline]
    pub fn read(&self, ptr: Ptr) -> Result<U256, Error> {
        self.words
            .get(ptr)
            .copied()
            .ok_or(Error::PointerOutOfBounds(ptr))
    }

    /// Overwrites an already appended word. The empty sentinel cannot be written.
    pub fn write(&mut self, ptr: Ptr, word: U256) -> Result<(), Error> {
        if ptr == NULL_PTR {
            return Err(Error::InvariantViolation("the empty sentinel is immutable"));
        }
        let slot = self
            .words
            .get_mut(ptr)
            .ok_or(Error::PointerOutOfBounds(ptr))?;
        *slot = word;
        Ok(())
    }

    /// Reads the word at `ptr` as a pointer or length.
    pub fn read_usize(&self, ptr: Ptr) -> Result<usize, Error> {
        usize::try_from(self.read(ptr)?).map_err(|_| Error::InvalidWord(ptr))
    }

    /// Returns the `len` words starting at `ptr`.
    pub fn slice(&self, ptr: Ptr, len: usize) -> Result<&[U256], Error> {
        let end = ptr
            .checked_add(len)
            .ok_or(Error::PointerOutOfBounds(ptr))?;
        self.words
            .get(ptr..end)
            .ok_or(Error::PointerOutOfBounds(end.saturating_sub(1)))
    }

    /// Appends a length-prefixed byte blob, see [pack_bytes].
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Ptr {
        self.append_slice(&pack_bytes(bytes))
    }

    /// Reads a byte blob written by [TrieArena::append_bytes].
    pub fn bytes(&self, ptr: Ptr) -> Result<Vec<u8>, Error> {
        let len = self.read_usize(ptr)?;
        let words = self.slice(ptr, 1 + len.div_ceil(32))?;
        let (bytes, _) = unpack_bytes(words).map_err(|_| Error::InvalidWord(ptr))?;
        Ok(bytes)
    }
}

/// Packs a byte blob into words: the byte length followed by the bytes in big-endian
/// chunks of 32, the last chunk padded with zeros on the right.
pub fn pack_bytes(bytes: &[u8]) -> Vec<U256> {
    let mut words = Vec::with_capacity(1 + bytes.len().div_ceil(32));
    words.push(U256::from(bytes.len()));
    for chunk in bytes.chunks(32) {
        let mut padded = [0u8; 32];
        padded[..chunk.len()].copy_from_slice(chunk);
        words.push(U256::from_be_bytes(padded));
    }
    words
}

/// Unpacks a blob produced by [pack_bytes] from the front of `words`, returning the bytes
/// and the number of words consumed.
pub fn unpack_bytes(words: &[U256]) -> Result<(Vec<u8>, usize), Error> {
    let len = words
        .first()
        .ok_or(Error::PointerOutOfBounds(0))
        .and_then(|w| usize::try_from(*w).map_err(|_| Error::InvalidWord(0)))?;
    let chunks = len.div_ceil(32);
    let body = words
        .get(1..1 + chunks)
        .ok_or(Error::PointerOutOfBounds(chunks))?;
    let mut bytes: Vec<u8> = body
        .iter()
        .flat_map(|w| w.to_be_bytes::<32>())
        .collect();
    bytes.truncate(len);
    Ok((bytes, 1 + chunks))
}

/// Interprets a word as a 32-byte digest.
#[inline]
pub fn word_to_b256(word: U256) -> B256 {
    B256::from(word.to_be_bytes::<32>())
}

/// Interprets a 32-byte digest as a word.
#[inline]
pub fn b256_to_word(digest: B256) -> U256 {
    U256::from_be_bytes(digest.0)
}
