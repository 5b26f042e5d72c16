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

//! The value encoders of the four tries of a block.

use zkevm_trie::{Error, Ptr, TrieArena, ValueEncoder};

use crate::{
    account::{AccountRecord, StateAccount},
    receipt::ReceiptRecord,
};

/// Storage slots hold a single word, committed to as its RLP scalar.
#[derive(Clone, Copy, Debug, Default)]
pub struct StorageEncoder;

impl ValueEncoder for StorageEncoder {
    fn encode_value(&self, arena: &TrieArena, value: Ptr) -> Result<Vec<u8>, Error> {
        Ok(alloy_rlp::encode(arena.read(value)?))
    }
}

/// Accounts are committed to as the RLP of [StateAccount], which requires hashing the
/// account's storage trie.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccountEncoder;

impl ValueEncoder for AccountEncoder {
    fn encode_value(&self, arena: &TrieArena, value: Ptr) -> Result<Vec<u8>, Error> {
        let record = AccountRecord::read(arena, value)?;
        let account = StateAccount {
            nonce: record.nonce,
            balance: record.balance,
            storage_root: arena.hash(record.storage_root, &StorageEncoder)?,
            code_hash: record.code_hash,
        };
        Ok(alloy_rlp::encode(account))
    }
}

/// Transactions are stored already encoded.
pub use zkevm_trie::RawBytes as TransactionEncoder;

#[derive(Clone, Copy, Debug, Default)]
pub struct ReceiptEncoder;

impl ValueEncoder for ReceiptEncoder {
    fn encode_value(&self, arena: &TrieArena, value: Ptr) -> Result<Vec<u8>, Error> {
        Ok(ReceiptRecord::read(arena, value)?.encoded())
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;
    use zkevm_trie::{keccak, Nibbles, EMPTY_ROOT, KECCAK_EMPTY, NULL_PTR};

    use super::*;

    #[test]
    fn storage_values() {
        let mut arena = TrieArena::new();
        let ptr = arena.append(U256::from(0x0400));
        assert_eq!(
            StorageEncoder.encode_value(&arena, ptr).unwrap(),
            vec![0x82, 0x04, 0x00]
        );
    }

    #[test]
    fn account_with_storage() {
        let mut arena = TrieArena::new();
        let value = arena.append(U256::from(1));
        let key = Nibbles::from_bytes(&keccak(U256::ZERO.to_be_bytes::<32>())).unwrap();
        let storage_root = arena.insert(NULL_PTR, key, value).unwrap();
        let expected_storage_root = arena.hash(storage_root, &StorageEncoder).unwrap();
        assert_ne!(expected_storage_root, EMPTY_ROOT);

        let record = AccountRecord {
            nonce: 1,
            storage_root,
            ..Default::default()
        };
        let ptr = arena.append_slice(&record.to_words());
        let encoded = AccountEncoder.encode_value(&arena, ptr).unwrap();
        let account: StateAccount =
            alloy_rlp::Decodable::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(account.storage_root, expected_storage_root);
        assert_eq!(account.code_hash, KECCAK_EMPTY);
        assert_eq!(account.nonce, 1);
    }
}
