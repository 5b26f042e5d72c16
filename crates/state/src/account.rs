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

use std::collections::BTreeMap;

use alloy_primitives::{Bytes, B256, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use zkevm_trie::{
    arena::{b256_to_word, word_to_b256},
    Error, Ptr, TrieArena, KECCAK_EMPTY, NULL_PTR,
};

/// Number of words of an account payload in the arena.
pub const ACCOUNT_WORDS: usize = 4;

/// An account as it is stored in the arena: `[nonce, balance, storage_root, code_hash]`.
///
/// `storage_root` points to the root of the account's storage trie in the same arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountRecord {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: Ptr,
    pub code_hash: B256,
}

impl Default for AccountRecord {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            storage_root: NULL_PTR,
            code_hash: KECCAK_EMPTY,
        }
    }
}

impl AccountRecord {
    /// Returns whether the account is empty as defined by
    /// [EIP-161](https://eips.ethereum.org/EIPS/eip-161).
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == KECCAK_EMPTY
    }

    pub fn to_words(&self) -> [U256; ACCOUNT_WORDS] {
        [
            U256::from(self.nonce),
            self.balance,
            U256::from(self.storage_root),
            b256_to_word(self.code_hash),
        ]
    }

    /// Reads the account payload at `ptr`.
    pub fn read(arena: &TrieArena, ptr: Ptr) -> Result<Self, Error> {
        let words = arena.slice(ptr, ACCOUNT_WORDS)?;
        Ok(Self {
            nonce: u64::try_from(words[0]).map_err(|_| Error::InvalidWord(ptr))?,
            balance: words[1],
            storage_root: usize::try_from(words[2]).map_err(|_| Error::InvalidWord(ptr + 2))?,
            code_hash: word_to_b256(words[3]),
        })
    }
}

/// Represents an account as it is committed to in the state trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct StateAccount {
    /// The number of transactions sent from this address, or contracts it created.
    pub nonce: u64,
    /// The amount of wei owned by the address.
    pub balance: U256,
    /// The root hash of the account's storage trie.
    pub storage_root: B256,
    /// The Keccak hash of the account's code.
    pub code_hash: B256,
}

/// An account of a pre-state allocation, e.g. from a genesis file or a witness.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisAccount {
    pub nonce: u64,
    pub balance: U256,
    pub code: Bytes,
    pub storage: BTreeMap<U256, U256>,
}
