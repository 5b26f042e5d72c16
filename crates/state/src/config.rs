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

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};

/// Address of the RIPEMD-160 precompile.
pub const RIPEMD160_ADDRESS: Address = address!("0000000000000000000000000000000000000003");

/// Maximum depth of nested calls in the EVM.
pub const MAX_CALL_DEPTH: usize = 1024;

/// Configuration of a [crate::StateDb].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Maximum number of nested checkpoint frames.
    pub max_checkpoint_depth: usize,
    /// Address that stays in the accessed set when its load is reverted
    /// ([EIP-716](https://eips.ethereum.org/EIPS/eip-716)).
    pub ripemd_address: Address,
    /// Delete touched empty accounts when a transaction is finalized
    /// ([EIP-161](https://eips.ethereum.org/EIPS/eip-161)).
    pub clear_empty_touched: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_checkpoint_depth: MAX_CALL_DEPTH,
            ripemd_address: RIPEMD160_ADDRESS,
            clear_empty_touched: true,
        }
    }
}
