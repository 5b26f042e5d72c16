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

use alloy_primitives::{Address, Bloom, Bytes, Log, U256};
use alloy_rlp::Encodable;
use serde::{Deserialize, Serialize};
use zkevm_trie::{
    arena::{b256_to_word, word_to_b256},
    pack_bytes, unpack_bytes, Error, Ptr, TrieArena,
};

/// Returns the arena payload of a log: `[address, num_topics, topics..., data_len, data...]`.
pub fn log_words(log: &Log) -> Vec<U256> {
    let topics = log.data.topics();
    let mut words = Vec::with_capacity(2 + topics.len());
    words.push(U256::from_be_slice(log.address.as_slice()));
    words.push(U256::from(topics.len()));
    words.extend(topics.iter().map(|topic| b256_to_word(*topic)));
    words.extend(pack_bytes(&log.data.data));
    words
}

/// Decodes a log payload from the front of `words`, returning the log and the number of
/// words it occupies.
pub fn decode_log(words: &[U256]) -> Result<(Log, usize), Error> {
    let header = words.get(..2).ok_or(Error::PointerOutOfBounds(2))?;
    let address = Address::from_word(word_to_b256(header[0]));
    let num_topics = usize::try_from(header[1]).map_err(|_| Error::InvalidWord(1))?;
    let topics = words
        .get(2..2 + num_topics)
        .ok_or(Error::PointerOutOfBounds(2 + num_topics))?
        .iter()
        .map(|word| word_to_b256(*word))
        .collect();
    let (data, data_words) = unpack_bytes(&words[2 + num_topics..])?;
    let log = Log::new_unchecked(address, topics, Bytes::from(data));
    Ok((log, 2 + num_topics + data_words))
}

/// The receipt of an executed transaction.
///
/// In the arena a receipt is stored as `[tx_type, status, cumulative_gas, num_logs,
/// log_ptrs...]`, with every pointer referencing a log payload as produced by [log_words].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    /// [EIP-2718](https://eips.ethereum.org/EIPS/eip-2718) transaction type, 0 for legacy.
    pub tx_type: u8,
    pub success: bool,
    /// Gas used by this and all preceding transactions of the block.
    pub cumulative_gas_used: u64,
    pub logs: Vec<Log>,
}

impl ReceiptRecord {
    /// Appends the receipt with its logs and returns the pointer to the receipt header.
    pub fn append_to(&self, arena: &mut TrieArena) -> Ptr {
        let log_ptrs: Vec<U256> = self
            .logs
            .iter()
            .map(|log| U256::from(arena.append_slice(&log_words(log))))
            .collect();
        let ptr = arena.append_slice(&[
            U256::from(self.tx_type),
            U256::from(u8::from(self.success)),
            U256::from(self.cumulative_gas_used),
            U256::from(log_ptrs.len()),
        ]);
        arena.append_slice(&log_ptrs);
        ptr
    }

    /// Reads the receipt stored at `ptr`.
    pub fn read(arena: &TrieArena, ptr: Ptr) -> Result<Self, Error> {
        let tx_type = u8::try_from(arena.read(ptr)?).map_err(|_| Error::InvalidWord(ptr))?;
        let cumulative_gas_used =
            u64::try_from(arena.read(ptr + 2)?).map_err(|_| Error::InvalidWord(ptr + 2))?;
        let num_logs = arena.read_usize(ptr + 3)?;
        let mut logs = Vec::with_capacity(num_logs);
        for i in 0..num_logs {
            let log_ptr = arena.read_usize(ptr + 4 + i)?;
            // the header tells how many words the log occupies
            let num_topics = arena.read_usize(log_ptr + 1)?;
            let data_len = arena.read_usize(log_ptr + 2 + num_topics)?;
            let words = arena.slice(log_ptr, 3 + num_topics + data_len.div_ceil(32))?;
            let (log, _) = decode_log(words)?;
            logs.push(log);
        }
        Ok(Self {
            tx_type,
            success: !arena.read(ptr + 1)?.is_zero(),
            cumulative_gas_used,
            logs,
        })
    }

    /// Returns the bloom filter of all the receipt's logs.
    pub fn bloom(&self) -> Bloom {
        let mut bloom = Bloom::default();
        for log in &self.logs {
            bloom.accrue_log(log);
        }
        bloom
    }

    /// Returns the [EIP-2718](https://eips.ethereum.org/EIPS/eip-2718) encoding of the
    /// receipt as it is stored in the receipt trie.
    pub fn encoded(&self) -> Vec<u8> {
        let bloom = self.bloom();
        let payload_length = self.success.length()
            + self.cumulative_gas_used.length()
            + bloom.length()
            + self.logs.length();
        let header = alloy_rlp::Header {
            list: true,
            payload_length,
        };

        let mut out = Vec::with_capacity(1 + header.length() + payload_length);
        // typed receipts are prefixed with their type
        if self.tx_type != 0 {
            out.push(self.tx_type);
        }
        header.encode(&mut out);
        self.success.encode(&mut out);
        self.cumulative_gas_used.encode(&mut out);
        bloom.encode(&mut out);
        self.logs.encode(&mut out);
        out
    }
}
