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

use alloy_primitives::{Address, Bytes, Log, B256, U256};
use hashbrown::{HashMap, HashSet};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use zkevm_trie::{keccak, Nibbles, Ptr, TrieArena, EMPTY_ROOT, KECCAK_EMPTY, NULL_PTR};

use crate::{
    account::{AccountRecord, GenesisAccount},
    config::StateConfig,
    encoders::{AccountEncoder, ReceiptEncoder, StorageEncoder, TransactionEncoder},
    error::StateError,
    journal::{Checkpoint, Journal, JournalEntry},
    receipt::{decode_log, log_words, ReceiptRecord},
};

/// The state trie is keyed by the hash of the address.
fn account_key(address: Address) -> Result<Nibbles, StateError> {
    Ok(Nibbles::from_bytes(&keccak(address))?)
}

/// Storage tries are keyed by the hash of the slot.
fn slot_key(slot: U256) -> Result<Nibbles, StateError> {
    Ok(Nibbles::from_bytes(&keccak(slot.to_be_bytes::<32>()))?)
}

/// The result of executing a transaction, as needed to commit it to the block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutcome {
    pub tx_type: u8,
    /// The EIP-2718 encoding of the transaction.
    pub raw: Bytes,
    pub success: bool,
    pub gas_used: u64,
}

/// The world state of a block under execution.
///
/// Accounts, every account's storage, transactions and receipts all live in tries of a
/// single [TrieArena]. Every mutation is recorded in a [Journal] before it is applied, so
/// any checkpoint taken during the current transaction can be restored exactly.
#[derive(Clone, Debug)]
pub struct StateDb {
    config: StateConfig,
    arena: TrieArena,
    state_root: Ptr,
    txn_root: Ptr,
    receipt_root: Ptr,
    journal: Journal,
    accessed_addresses: HashSet<Address>,
    accessed_storage_keys: HashSet<(Address, U256)>,
    touched: HashSet<Address>,
    selfdestructs: Vec<Address>,
    refund: u64,
    log_offsets: Vec<usize>,
    log_payload: Vec<U256>,
    codes: HashMap<B256, Bytes>,
    txn_count: usize,
    cumulative_gas_used: u64,
}

impl Default for StateDb {
    fn default() -> Self {
        Self::new(StateConfig::default())
    }
}

impl StateDb {
    pub fn new(config: StateConfig) -> Self {
        let journal = Journal::new(config.max_checkpoint_depth);
        Self {
            config,
            arena: TrieArena::new(),
            state_root: NULL_PTR,
            txn_root: NULL_PTR,
            receipt_root: NULL_PTR,
            journal,
            accessed_addresses: HashSet::new(),
            accessed_storage_keys: HashSet::new(),
            touched: HashSet::new(),
            selfdestructs: Vec::new(),
            refund: 0,
            log_offsets: Vec::new(),
            log_payload: Vec::new(),
            codes: HashMap::new(),
            txn_count: 0,
            cumulative_gas_used: 0,
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    pub fn arena(&self) -> &TrieArena {
        &self.arena
    }

    /// Returns the pointer to the current root of the state trie.
    pub fn state_trie(&self) -> Ptr {
        self.state_root
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn account(&self, address: Address) -> Result<Option<AccountRecord>, StateError> {
        match self.arena.get(self.state_root, account_key(address)?)? {
            Some(ptr) => Ok(Some(AccountRecord::read(&self.arena, ptr)?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, address: Address) -> Result<bool, StateError> {
        Ok(self.account(address)?.is_some())
    }

    pub fn balance(&self, address: Address) -> Result<U256, StateError> {
        Ok(self.account(address)?.map_or(U256::ZERO, |a| a.balance))
    }

    pub fn nonce(&self, address: Address) -> Result<u64, StateError> {
        Ok(self.account(address)?.map_or(0, |a| a.nonce))
    }

    pub fn code_hash(&self, address: Address) -> Result<B256, StateError> {
        Ok(self.account(address)?.map_or(KECCAK_EMPTY, |a| a.code_hash))
    }

    /// Returns the code of the account, or [None] if its code is not known.
    pub fn code(&self, address: Address) -> Result<Option<Bytes>, StateError> {
        let code_hash = self.code_hash(address)?;
        if code_hash == KECCAK_EMPTY {
            return Ok(Some(Bytes::new()));
        }
        Ok(self.codes.get(&code_hash).cloned())
    }

    fn require_account(&self, address: Address) -> Result<AccountRecord, StateError> {
        self.account(address)?
            .ok_or(StateError::AccountNotFound(address))
    }

    fn write_account(
        &mut self,
        address: Address,
        account: &AccountRecord,
    ) -> Result<(), StateError> {
        let ptr = self.arena.append_slice(&account.to_words());
        self.state_root = self
            .arena
            .insert(self.state_root, account_key(address)?, ptr)?;
        Ok(())
    }

    fn remove_account(&mut self, address: Address) -> Result<(), StateError> {
        self.state_root = self.arena.delete(self.state_root, account_key(address)?)?;
        Ok(())
    }

    fn store_code(&mut self, code: Bytes) -> B256 {
        if code.is_empty() {
            return KECCAK_EMPTY;
        }
        let code_hash = B256::from(keccak(&code));
        self.codes.entry(code_hash).or_insert(code);
        code_hash
    }

    /// Inserts a pre-state account, e.g. from a witness, without journaling it.
    pub fn load_account(
        &mut self,
        address: Address,
        account: GenesisAccount,
    ) -> Result<(), StateError> {
        if self.exists(address)? {
            return Err(StateError::AccountCollision(address));
        }
        let mut storage_root = NULL_PTR;
        for (slot, value) in account.storage.iter().filter(|(_, value)| !value.is_zero()) {
            let ptr = self.arena.append(*value);
            storage_root = self.arena.insert(storage_root, slot_key(*slot)?, ptr)?;
        }
        let record = AccountRecord {
            nonce: account.nonce,
            balance: account.balance,
            storage_root,
            code_hash: self.store_code(account.code),
        };
        trace!("loaded account {address}: {record:?}");
        self.write_account(address, &record)
    }

    /// Creates an empty account at `address`.
    ///
    /// Returns `false` if the address already holds an account with nothing but a balance,
    /// which is kept as is. Any other existing account is a collision.
    pub fn create_account(&mut self, address: Address) -> Result<bool, StateError> {
        match self.account(address)? {
            None => {
                self.journal
                    .append(JournalEntry::AccountCreated { address });
                self.write_account(address, &AccountRecord::default())?;
                Ok(true)
            }
            Some(account)
                if account.nonce == 0
                    && account.code_hash == KECCAK_EMPTY
                    && account.storage_root == NULL_PTR =>
            {
                Ok(false)
            }
            Some(_) => Err(StateError::AccountCollision(address)),
        }
    }

    pub fn sload(&self, address: Address, slot: U256) -> Result<U256, StateError> {
        match self.account(address)? {
            Some(account) => self.storage_value(&account, slot),
            None => Ok(U256::ZERO),
        }
    }

    fn storage_value(&self, account: &AccountRecord, slot: U256) -> Result<U256, StateError> {
        match self.arena.get(account.storage_root, slot_key(slot)?)? {
            Some(ptr) => Ok(self.arena.read(ptr)?),
            None => Ok(U256::ZERO),
        }
    }

    /// Writes a storage slot of an existing account. Storing zero removes the slot.
    pub fn sstore(&mut self, address: Address, slot: U256, value: U256) -> Result<(), StateError> {
        let account = self.require_account(address)?;
        let prev_value = self.storage_value(&account, slot)?;
        if prev_value == value {
            return Ok(());
        }
        self.journal.append(JournalEntry::StorageChange {
            address,
            slot,
            prev_value,
        });
        self.write_storage(address, slot, value)
    }

    fn write_storage(
        &mut self,
        address: Address,
        slot: U256,
        value: U256,
    ) -> Result<(), StateError> {
        let mut account = self.require_account(address)?;
        let key = slot_key(slot)?;
        if value.is_zero() {
            if self.arena.get(account.storage_root, key)?.is_none() {
                return Ok(());
            }
            account.storage_root = self.arena.delete(account.storage_root, key)?;
        } else {
            let ptr = self.arena.append(value);
            account.storage_root = self.arena.insert(account.storage_root, key, ptr)?;
        }
        self.write_account(address, &account)
    }

    pub fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), StateError> {
        let mut account = self.require_account(address)?;
        self.journal.append(JournalEntry::NonceChange {
            address,
            prev_nonce: account.nonce,
        });
        account.nonce = nonce;
        self.write_account(address, &account)
    }

    /// Increments the nonce and returns its previous value.
    pub fn increment_nonce(&mut self, address: Address) -> Result<u64, StateError> {
        let nonce = self.require_account(address)?.nonce;
        let next = nonce
            .checked_add(1)
            .ok_or(StateError::NonceOverflow(address))?;
        self.set_nonce(address, next)?;
        Ok(nonce)
    }

    pub fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), StateError> {
        let mut account = self.require_account(address)?;
        self.journal.append(JournalEntry::CodeChange {
            address,
            prev_code_hash: account.code_hash,
        });
        account.code_hash = self.store_code(code);
        self.write_account(address, &account)
    }

    /// Moves `amount` from `from` to `to`, creating the recipient if it does not exist.
    pub fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), StateError> {
        let sender = self.require_account(from)?;
        if sender.balance < amount {
            return Err(StateError::InsufficientBalance {
                address: from,
                balance: sender.balance,
                amount,
            });
        }
        if amount.is_zero() {
            return Ok(());
        }
        if from != to {
            self.prepare_recipient(to, amount)?;
        }
        self.journal
            .append(JournalEntry::BalanceTransfer { from, to, amount });
        self.move_balance(from, to, amount)
    }

    /// Makes sure `to` exists and can receive `amount` before anything is journaled for the
    /// transfer itself.
    fn prepare_recipient(&mut self, to: Address, amount: U256) -> Result<(), StateError> {
        match self.account(to)? {
            None => {
                self.create_account(to)?;
            }
            Some(recipient) => {
                if recipient.balance.checked_add(amount).is_none() {
                    return Err(StateError::BalanceOverflow(to));
                }
            }
        }
        Ok(())
    }

    fn move_balance(&mut self, from: Address, to: Address, amount: U256) -> Result<(), StateError> {
        if from == to {
            return Ok(());
        }
        let mut sender = self.require_account(from)?;
        let mut recipient = self.require_account(to)?;
        sender.balance = sender
            .balance
            .checked_sub(amount)
            .ok_or(StateError::InsufficientBalance {
                address: from,
                balance: sender.balance,
                amount,
            })?;
        recipient.balance = recipient
            .balance
            .checked_add(amount)
            .ok_or(StateError::BalanceOverflow(to))?;
        self.write_account(from, &sender)?;
        self.write_account(to, &recipient)
    }

    /// Self-destructs `address`, moving its whole balance to `target`. The account itself
    /// is deleted when the transaction is finalized.
    pub fn selfdestruct(&mut self, address: Address, target: Address) -> Result<(), StateError> {
        let prev_balance = self.require_account(address)?.balance;
        let moves_balance = target != address && !prev_balance.is_zero();
        if moves_balance {
            self.prepare_recipient(target, prev_balance)?;
        }
        self.journal.append(JournalEntry::AccountDestroyed {
            address,
            target,
            prev_balance,
        });
        if moves_balance {
            self.move_balance(address, target, prev_balance)?;
        }
        self.selfdestructs.push(address);
        Ok(())
    }

    /// Returns the self-destructed addresses in the order of their destruction.
    pub fn selfdestructs(&self) -> &[Address] {
        &self.selfdestructs
    }

    pub fn add_refund(&mut self, amount: u64) -> Result<(), StateError> {
        self.refund = self
            .refund
            .checked_add(amount)
            .ok_or(StateError::RefundOverflow)?;
        self.journal.append(JournalEntry::Refund { amount });
        Ok(())
    }

    pub fn refund(&self) -> u64 {
        self.refund
    }

    pub fn emit_log(&mut self, log: Log) {
        self.journal.append(JournalEntry::Log {
            prev_data_len: self.log_offsets.len(),
            prev_payload_len: self.log_payload.len(),
        });
        self.log_offsets.push(self.log_payload.len());
        self.log_payload.extend(log_words(&log));
    }

    /// Returns the logs emitted by the current transaction.
    pub fn logs(&self) -> Result<Vec<Log>, StateError> {
        self.log_offsets
            .iter()
            .map(|offset| -> Result<Log, StateError> {
                let words = self
                    .log_payload
                    .get(*offset..)
                    .ok_or(zkevm_trie::Error::PointerOutOfBounds(*offset))?;
                Ok(decode_log(words)?.0)
            })
            .collect()
    }

    /// Marks `address` as accessed and returns whether it was cold.
    pub fn access_address(&mut self, address: Address) -> bool {
        let cold = self.accessed_addresses.insert(address);
        if cold {
            self.journal.append(JournalEntry::AccountLoaded { address });
        }
        cold
    }

    pub fn is_address_accessed(&self, address: Address) -> bool {
        self.accessed_addresses.contains(&address)
    }

    /// Marks the storage slot as accessed and returns whether it was cold.
    pub fn access_storage_key(&mut self, address: Address, slot: U256) -> bool {
        let cold = self.accessed_storage_keys.insert((address, slot));
        if cold {
            self.journal
                .append(JournalEntry::StorageLoaded { address, slot });
        }
        cold
    }

    pub fn is_storage_key_accessed(&self, address: Address, slot: U256) -> bool {
        self.accessed_storage_keys.contains(&(address, slot))
    }

    pub fn touch_account(&mut self, address: Address) {
        if self.touched.insert(address) {
            self.journal.append(JournalEntry::AccountTouched { address });
        }
    }

    pub fn is_touched(&self, address: Address) -> bool {
        self.touched.contains(&address)
    }

    /// Opens a checkpoint frame for a new call.
    pub fn begin_checkpoint(&mut self) -> Result<Checkpoint, StateError> {
        let checkpoint = self.journal.begin()?;
        debug!(
            "begin checkpoint at {} (depth {})",
            checkpoint.journal_len(),
            self.journal.depth()
        );
        Ok(checkpoint)
    }

    /// Closes the innermost frame and keeps its changes.
    pub fn commit(&mut self) -> Result<(), StateError> {
        let checkpoint = self.journal.end_frame()?;
        debug!("commit checkpoint at {}", checkpoint.journal_len());
        Ok(())
    }

    /// Closes the innermost frame and undoes all of its changes.
    pub fn revert(&mut self) -> Result<(), StateError> {
        let checkpoint = self.journal.end_frame()?;
        debug!("revert checkpoint at {}", checkpoint.journal_len());
        self.revert_to(checkpoint)
    }

    /// Returns a checkpoint at the current end of the journal.
    pub fn checkpoint(&self) -> Checkpoint {
        self.journal.checkpoint()
    }

    /// Undoes all changes made after `checkpoint`, latest first.
    pub fn revert_to(&mut self, checkpoint: Checkpoint) -> Result<(), StateError> {
        let entries = self.journal.split_off(checkpoint)?;
        for entry in entries.into_iter().rev() {
            self.undo(entry)?;
        }
        Ok(())
    }

    fn undo(&mut self, entry: JournalEntry) -> Result<(), StateError> {
        trace!("undo {entry:?}");
        match entry {
            JournalEntry::AccountCreated { address } => self.remove_account(address)?,
            JournalEntry::AccountDestroyed {
                address,
                target,
                prev_balance,
            } => {
                let pos = self
                    .selfdestructs
                    .iter()
                    .rposition(|destroyed| *destroyed == address)
                    .ok_or(StateError::RevertUnderflow("self-destruct was not recorded"))?;
                self.selfdestructs.remove(pos);
                if target != address && !prev_balance.is_zero() {
                    self.move_balance(target, address, prev_balance)
                        .map_err(|err| match err {
                            StateError::InsufficientBalance { .. } => StateError::RevertUnderflow(
                                "self-destruct beneficiary lacks the inherited balance",
                            ),
                            err => err,
                        })?;
                }
            }
            // touched accounts stay touched
            JournalEntry::AccountTouched { .. } => {}
            JournalEntry::AccountLoaded { address } => {
                if address != self.config.ripemd_address {
                    self.accessed_addresses.remove(&address);
                }
            }
            JournalEntry::BalanceTransfer { from, to, amount } => {
                self.move_balance(to, from, amount).map_err(|err| match err {
                    StateError::InsufficientBalance { .. } => {
                        StateError::RevertUnderflow("recipient lacks the transferred balance")
                    }
                    err => err,
                })?
            }
            JournalEntry::CodeChange {
                address,
                prev_code_hash,
            } => {
                let mut account = self.require_account(address)?;
                account.code_hash = prev_code_hash;
                self.write_account(address, &account)?;
            }
            JournalEntry::NonceChange {
                address,
                prev_nonce,
            } => {
                let mut account = self.require_account(address)?;
                account.nonce = prev_nonce;
                self.write_account(address, &account)?;
            }
            JournalEntry::StorageChange {
                address,
                slot,
                prev_value,
            } => self.write_storage(address, slot, prev_value)?,
            JournalEntry::StorageLoaded { address, slot } => {
                self.accessed_storage_keys.remove(&(address, slot));
            }
            JournalEntry::Refund { amount } => {
                self.refund = self
                    .refund
                    .checked_sub(amount)
                    .ok_or(StateError::RevertUnderflow("refund counter below the refund"))?;
            }
            JournalEntry::Log {
                prev_data_len,
                prev_payload_len,
            } => {
                self.log_offsets.truncate(prev_data_len);
                self.log_payload.truncate(prev_payload_len);
            }
        }
        Ok(())
    }

    pub fn state_root(&self) -> Result<B256, StateError> {
        let root = self.arena.hash(self.state_root, &AccountEncoder)?;
        debug!("state root: {root}");
        Ok(root)
    }

    pub fn storage_root(&self, address: Address) -> Result<B256, StateError> {
        match self.account(address)? {
            Some(account) => Ok(self.arena.hash(account.storage_root, &StorageEncoder)?),
            None => Ok(EMPTY_ROOT),
        }
    }

    pub fn txn_root(&self) -> Result<B256, StateError> {
        Ok(self.arena.hash(self.txn_root, &TransactionEncoder)?)
    }

    pub fn receipt_root(&self) -> Result<B256, StateError> {
        Ok(self.arena.hash(self.receipt_root, &ReceiptEncoder)?)
    }

    /// Returns the number of finalized transactions.
    pub fn txn_count(&self) -> usize {
        self.txn_count
    }

    pub fn cumulative_gas_used(&self) -> u64 {
        self.cumulative_gas_used
    }

    /// Commits the current transaction to the block.
    ///
    /// The transaction and its receipt are inserted into their tries at the next index,
    /// self-destructed and, if configured, touched empty accounts are deleted, and all
    /// per-transaction bookkeeping is reset. No checkpoint frame may be open.
    pub fn finalize_transaction(
        &mut self,
        outcome: TxOutcome,
    ) -> Result<ReceiptRecord, StateError> {
        if self.journal.depth() > 0 {
            return Err(StateError::OpenCheckpoints(self.journal.depth()));
        }

        self.cumulative_gas_used = self.cumulative_gas_used.saturating_add(outcome.gas_used);
        let receipt = ReceiptRecord {
            tx_type: outcome.tx_type,
            success: outcome.success,
            cumulative_gas_used: self.cumulative_gas_used,
            logs: self.logs()?,
        };
        let key = alloy_rlp::encode(self.txn_count);
        let txn = self.arena.append_bytes(&outcome.raw);
        self.txn_root = self.arena.insert_bytes(self.txn_root, &key, txn)?;
        let receipt_ptr = receipt.append_to(&mut self.arena);
        self.receipt_root = self
            .arena
            .insert_bytes(self.receipt_root, &key, receipt_ptr)?;

        for address in std::mem::take(&mut self.selfdestructs) {
            if self.exists(address)? {
                debug!("deleting self-destructed account {address}");
                self.remove_account(address)?;
            }
        }
        if self.config.clear_empty_touched {
            let mut touched: Vec<Address> = self.touched.iter().copied().collect();
            touched.sort_unstable();
            for address in touched {
                if self.account(address)?.is_some_and(|account| account.is_empty()) {
                    debug!("deleting touched empty account {address}");
                    self.remove_account(address)?;
                }
            }
        }

        self.journal.clear();
        self.accessed_addresses.clear();
        self.accessed_storage_keys.clear();
        self.touched.clear();
        self.refund = 0;
        self.log_offsets.clear();
        self.log_payload.clear();
        self.txn_count += 1;
        debug!(
            "finalized transaction {} (cumulative gas {})",
            self.txn_count - 1,
            self.cumulative_gas_used
        );

        Ok(receipt)
    }
}
