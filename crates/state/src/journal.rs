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

use alloy_primitives::{Address, B256, U256};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// A reversible state mutation.
///
/// Every entry carries the values needed to undo it, so reverting never has to consult
/// any other record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// A new account was created; undone by deleting it.
    AccountCreated { address: Address },
    /// `address` self-destructed and its balance went to `target`.
    AccountDestroyed {
        address: Address,
        target: Address,
        prev_balance: U256,
    },
    /// The account was touched; never undone.
    AccountTouched { address: Address },
    /// The address was added to the accessed addresses.
    AccountLoaded { address: Address },
    BalanceTransfer {
        from: Address,
        to: Address,
        amount: U256,
    },
    CodeChange {
        address: Address,
        prev_code_hash: B256,
    },
    NonceChange { address: Address, prev_nonce: u64 },
    StorageChange {
        address: Address,
        slot: U256,
        prev_value: U256,
    },
    /// The storage slot was added to the accessed storage keys.
    StorageLoaded { address: Address, slot: U256 },
    Refund { amount: u64 },
    /// A log was emitted; the lengths of the log buffers before it.
    Log {
        prev_data_len: usize,
        prev_payload_len: usize,
    },
}

/// Marks a position in the journal: its length at the time the checkpoint was taken.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Checkpoint(usize);

impl Checkpoint {
    /// Returns the journal length this checkpoint refers to.
    pub fn journal_len(&self) -> usize {
        self.0
    }
}

/// Append-only log of state mutations with a stack of checkpoint frames.
///
/// Frames follow the nesting of calls: a frame can only be released after every frame
/// opened after it, and reverting never crosses the innermost open frame.
#[derive(Clone, Debug)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    frames: Vec<Checkpoint>,
    max_depth: usize,
}

impl Journal {
    pub fn new(max_depth: usize) -> Self {
        Self {
            entries: Vec::new(),
            frames: Vec::new(),
            max_depth,
        }
    }

    pub fn append(&mut self, entry: JournalEntry) {
        trace!("journal[{}]: {entry:?}", self.entries.len());
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Returns a checkpoint at the current end of the journal.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.entries.len())
    }

    /// Returns the number of open frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Opens a new frame at the current end of the journal.
    pub fn begin(&mut self) -> Result<Checkpoint, StateError> {
        if self.frames.len() >= self.max_depth {
            return Err(StateError::CheckpointDepthExceeded(self.max_depth));
        }
        let checkpoint = self.checkpoint();
        self.frames.push(checkpoint);
        Ok(checkpoint)
    }

    /// Closes the innermost frame and returns the checkpoint it was opened at. The entries
    /// of the frame stay in the journal and belong to the enclosing frame from now on.
    pub fn end_frame(&mut self) -> Result<Checkpoint, StateError> {
        self.frames.pop().ok_or(StateError::NoOpenCheckpoint)
    }

    /// Removes and returns all entries after `checkpoint`, oldest first.
    pub fn split_off(&mut self, checkpoint: Checkpoint) -> Result<Vec<JournalEntry>, StateError> {
        if checkpoint.0 > self.entries.len() {
            return Err(StateError::JournalUnderflow {
                checkpoint,
                len: self.entries.len(),
            });
        }
        if let Some(&frame) = self.frames.last() {
            if checkpoint < frame {
                return Err(StateError::CrossFrameRevert { checkpoint, frame });
            }
        }
        Ok(self.entries.split_off(checkpoint.0))
    }

    /// Drops all entries and frames.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refund(amount: u64) -> JournalEntry {
        JournalEntry::Refund { amount }
    }

    #[test]
    fn frames() {
        let mut journal = Journal::new(2);
        journal.append(refund(1));
        let outer = journal.begin().unwrap();
        assert_eq!(outer.journal_len(), 1);
        journal.append(refund(2));
        let inner = journal.begin().unwrap();
        assert!(matches!(
            journal.begin(),
            Err(StateError::CheckpointDepthExceeded(2))
        ));
        journal.append(refund(3));
        assert_eq!(journal.depth(), 2);

        assert_eq!(journal.end_frame().unwrap(), inner);
        // committed entries can still be reverted by the outer frame
        assert_eq!(journal.end_frame().unwrap(), outer);
        assert_eq!(journal.split_off(outer).unwrap(), vec![refund(2), refund(3)]);
        assert_eq!(journal.entries(), &[refund(1)]);
        assert!(matches!(
            journal.end_frame(),
            Err(StateError::NoOpenCheckpoint)
        ));
    }

    #[test]
    fn invalid_checkpoints() {
        let mut journal = Journal::new(8);
        let early = journal.checkpoint();
        journal.append(refund(1));
        let late = journal.checkpoint();
        journal.append(refund(2));
        journal.begin().unwrap();

        assert!(matches!(
            journal.split_off(early),
            Err(StateError::CrossFrameRevert { .. })
        ));
        assert!(matches!(
            journal.split_off(late),
            Err(StateError::CrossFrameRevert { .. })
        ));
        // nothing was removed by the failed reverts
        assert_eq!(journal.len(), 2);

        journal.end_frame().unwrap();
        assert_eq!(journal.split_off(late).unwrap(), vec![refund(2)]);
        assert!(matches!(
            journal.split_off(Checkpoint(5)),
            Err(StateError::JournalUnderflow { len: 1, .. })
        ));
        journal.clear();
        assert!(journal.is_empty());
        assert_eq!(journal.depth(), 0);
    }
}
