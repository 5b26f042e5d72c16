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

//! A copy-on-write Merkle Patricia Trie stored in an append-only word arena.
//!
//! Nodes are never modified once written. Every insertion or deletion appends the
//! nodes along the touched path and returns a new root pointer, so every root that
//! was ever produced stays readable and hashable.

pub mod arena;
pub mod hash;
pub mod keccak;
pub mod mpt;
pub mod nibbles;
pub mod node;

use alloy_primitives::{b256, B256};
use thiserror::Error as ThisError;

pub use self::{
    arena::{pack_bytes, unpack_bytes, Ptr, TrieArena, NULL_PTR},
    hash::{NodeReference, RawBytes, ValueEncoder},
    keccak::{keccak, KECCAK_EMPTY},
    nibbles::{Nibbles, MAX_NIBBLES},
    node::{NodeTag, TrieNode},
};

/// Root hash of an empty trie.
pub const EMPTY_ROOT: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Represents the errors of the trie arena and the operations over it.
///
/// None of these are recoverable: they signal a caller bug, a corrupted arena or
/// an unresolved part of a sparse witness, and the surrounding execution is expected
/// to abort.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A structural invariant of the trie does not hold, e.g. the deletion of an absent
    /// key or a branch left without children.
    #[error("structural invariant violated: {0}")]
    InvariantViolation(&'static str),
    /// An operation reached a sub-trie that is only known by its digest.
    #[error("reached an unresolved node: {0:#}")]
    NodeNotResolved(B256),
    /// A pointer beyond the end of the arena.
    #[error("pointer {0} is out of bounds")]
    PointerOutOfBounds(Ptr),
    /// A word that should hold a pointer or a length does not fit into one.
    #[error("word at {0} is not a valid pointer or length")]
    InvalidWord(Ptr),
    /// A node record starts with an unknown tag.
    #[error("invalid node tag {tag} at {ptr}")]
    InvalidNodeTag { ptr: Ptr, tag: u64 },
    /// A nibble path longer than one word.
    #[error("nibble path of length {0} exceeds the maximum")]
    PathTooLong(usize),
    /// A value payload could not be decoded.
    #[error("RLP error")]
    Rlp(#[from] alloy_rlp::Error),
}
