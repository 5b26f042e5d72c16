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

use std::{collections::BTreeMap, fs, path::PathBuf};

use alloy_primitives::{Address, B256};
use anyhow::Context;
use clap::Parser;
use log::info;
use serde::Serialize;
use zkevm_state::{GenesisAccount, StateConfig, StateDb};

#[derive(clap::Parser, Debug, Clone)]
#[command(name = "state-root")]
#[command(bin_name = "state-root")]
#[command(author, version, about, long_about = None)]
/// Computes the state root of a genesis-style account allocation
pub struct Cli {
    #[clap(long, require_equals = true)]
    /// JSON file mapping addresses to accounts
    pub alloc: PathBuf,

    #[clap(long, require_equals = true)]
    /// JSON file with the state configuration
    pub config: Option<PathBuf>,

    #[clap(long)]
    /// Also report the storage root of every account
    pub storage_roots: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    state_root: B256,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_roots: Option<BTreeMap<Address, B256>>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> anyhow::Result<T> {
    let json = fs::read_to_string(path).with_context(|| format!("failed to read {path:?}"))?;
    serde_json::from_str(&json).with_context(|| format!("failed to parse {path:?}"))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config: StateConfig = match &cli.config {
        Some(path) => read_json(path)?,
        None => StateConfig::default(),
    };
    let alloc: BTreeMap<Address, GenesisAccount> = read_json(&cli.alloc)?;
    info!("Loading {} accounts", alloc.len());

    let mut state = StateDb::new(config);
    for (address, account) in &alloc {
        state
            .load_account(*address, account.clone())
            .with_context(|| format!("account {address} invalid"))?;
    }

    let storage_roots = if cli.storage_roots {
        let mut roots = BTreeMap::new();
        for address in alloc.keys() {
            roots.insert(*address, state.storage_root(*address)?);
        }
        Some(roots)
    } else {
        None
    };
    let report = Report {
        state_root: state.state_root().context("failed to hash the state trie")?,
        storage_roots,
    };
    info!("State root: {}", report.state_root);
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
