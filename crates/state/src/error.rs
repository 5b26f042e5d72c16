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

use alloy_primitives::{Address, U256};
use thiserror::Error as ThisError;

use crate::journal::Checkpoint;

/// Represents the errors of the state core.
///
/// Apart from [StateError::InsufficientBalance] and [StateError::AccountCollision], which
/// are detected before anything is journaled and map to an exceptional halt of the
/// current call, all of them are fatal for the whole execution.
#[derive(Debug, ThisError)]
pub enum StateError {
    #[error(transparent)]
    Trie(#[from] zkevm_trie::Error),
    /// A revert to a checkpoint beyond the current journal length.
    #[error("cannot revert to {checkpoint:?}, the journal has {len} entries")]
    JournalUnderflow { checkpoint: Checkpoint, len: usize },
    /// A revert to a checkpoint that was taken before the innermost open frame.
    #[error("cannot revert to {checkpoint:?} across the frame opened at {frame:?}")]
    CrossFrameRevert {
        checkpoint: Checkpoint,
        frame: Checkpoint,
    },
    #[error("no checkpoint frame is open")]
    NoOpenCheckpoint,
    #[error("more than {0} nested checkpoints")]
    CheckpointDepthExceeded(usize),
    /// The transaction cannot be finalized while checkpoint frames are still open.
    #[error("{0} checkpoint frames are still open")]
    OpenCheckpoints(usize),
    #[error("account {0} does not exist")]
    AccountNotFound(Address),
    #[error("account {0} already exists")]
    AccountCollision(Address),
    #[error("account {address} has balance {balance}, {amount} required")]
    InsufficientBalance {
        address: Address,
        balance: U256,
        amount: U256,
    },
    #[error("balance of {0} overflows")]
    BalanceOverflow(Address),
    #[error("nonce of {0} overflows")]
    NonceOverflow(Address),
    #[error("refund counter overflows")]
    RefundOverflow,
    /// The inverse of a journal entry is undefined for the current state.
    #[error("cannot revert journal entry: {0}")]
    RevertUnderflow(&'static str),
}
