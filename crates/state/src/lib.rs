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

//! Journaled Ethereum world state on top of the [zkevm_trie] arena.

pub mod account;
pub mod config;
pub mod encoders;
pub mod error;
pub mod journal;
pub mod receipt;
pub mod state;

pub use zkevm_trie as trie;

pub use self::{
    account::{AccountRecord, GenesisAccount, StateAccount},
    config::{StateConfig, MAX_CALL_DEPTH, RIPEMD160_ADDRESS},
    error::StateError,
    journal::{Checkpoint, Journal, JournalEntry},
    receipt::ReceiptRecord,
    state::{StateDb, TxOutcome},
};
