//! The host: a journaled view of world state.
//!
//! Handlers never touch the [`Database`] backend directly. Every read goes
//! through per-transaction caches and every write appends an inverse entry
//! to the [`Journal`] first, so any snapshot can be rolled back to exactly.
//! Warm/cold tracking, transient storage, logs, refunds and self-destruct
//! registration all live here because they all revert with the journal.

use crate::{
    analysis::CodeAnalysis,
    db::Database,
    errors::{DatabaseError, InternalError, VMError},
    journal::{Journal, JournalEntry},
};
use kestrel_common::{
    Address, H256, U256,
    types::{AccountState, Code, Fork, Log},
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::{rc::Rc, sync::Arc};

/// EIP-1153 transient storage, keyed by (account, slot).
pub type TransientStorage = FxHashMap<(Address, U256), U256>;

#[derive(Clone)]
pub struct Host {
    pub store: Arc<dyn Database>,
    accounts: FxHashMap<Address, AccountState>,
    code_cache: FxHashMap<H256, Code>,
    storage: FxHashMap<(Address, H256), U256>,
    /// First-seen (pre-transaction) value of each touched slot, for SSTORE
    /// net metering.
    original_storage: FxHashMap<(Address, H256), U256>,
    transient: TransientStorage,
    warm_addresses: FxHashSet<Address>,
    warm_slots: FxHashSet<(Address, H256)>,
    created_accounts: FxHashSet<Address>,
    selfdestructs: FxHashSet<Address>,
    logs: Vec<Log>,
    refund: i64,
    journal: Journal,
    analysis_cache: FxHashMap<(H256, Fork), Rc<CodeAnalysis>>,
}

impl Host {
    pub fn new(store: Arc<dyn Database>) -> Self {
        Self {
            store,
            accounts: FxHashMap::default(),
            code_cache: FxHashMap::default(),
            storage: FxHashMap::default(),
            original_storage: FxHashMap::default(),
            transient: TransientStorage::default(),
            warm_addresses: FxHashSet::default(),
            warm_slots: FxHashSet::default(),
            created_accounts: FxHashSet::default(),
            selfdestructs: FxHashSet::default(),
            logs: Vec::new(),
            refund: 0,
            journal: Journal::default(),
            analysis_cache: FxHashMap::default(),
        }
    }

    fn load_account(&mut self, address: Address) -> Result<AccountState, DatabaseError> {
        if let Some(state) = self.accounts.get(&address) {
            return Ok(*state);
        }
        let state = self.store.get_account_state(address)?;
        self.accounts.insert(address, state);
        Ok(state)
    }

    fn account_mut(&mut self, address: Address) -> Result<&mut AccountState, VMError> {
        self.load_account(address)?;
        self.accounts
            .get_mut(&address)
            .ok_or_else(|| InternalError::Custom("account vanished from cache".to_string()).into())
    }

    // ----- accounts -----

    pub fn balance(&mut self, address: Address) -> Result<U256, VMError> {
        Ok(self.load_account(address)?.balance)
    }

    pub fn nonce(&mut self, address: Address) -> Result<u64, VMError> {
        Ok(self.load_account(address)?.nonce)
    }

    pub fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), VMError> {
        let account = self.account_mut(address)?;
        let prev = account.nonce;
        account.nonce = nonce;
        self.journal.record(JournalEntry::NonceChange { address, prev });
        Ok(())
    }

    pub fn increment_nonce(&mut self, address: Address) -> Result<(), VMError> {
        let nonce = self.nonce(address)?;
        let next = nonce.checked_add(1).ok_or(InternalError::Overflow)?;
        self.set_nonce(address, next)
    }

    pub fn set_balance(&mut self, address: Address, balance: U256) -> Result<(), VMError> {
        let account = self.account_mut(address)?;
        let prev = account.balance;
        account.balance = balance;
        self.journal.record(JournalEntry::BalanceChange { address, prev });
        Ok(())
    }

    pub fn add_balance(&mut self, address: Address, amount: U256) -> Result<(), VMError> {
        let balance = self.balance(address)?;
        let new = balance
            .checked_add(amount)
            .ok_or(InternalError::Overflow)?;
        self.set_balance(address, new)
    }

    pub fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), VMError> {
        let balance = self.balance(address)?;
        let new = balance
            .checked_sub(amount)
            .ok_or(InternalError::Underflow)?;
        self.set_balance(address, new)
    }

    /// Move value between accounts. The caller has already checked the
    /// sender's balance.
    pub fn transfer(&mut self, from: Address, to: Address, value: U256) -> Result<(), VMError> {
        if value.is_zero() {
            // Still touch the recipient so existence checks see it.
            self.load_account(to)?;
            return Ok(());
        }
        self.sub_balance(from, value)?;
        self.add_balance(to, value)
    }

    pub fn code_hash(&mut self, address: Address) -> Result<H256, VMError> {
        Ok(self.load_account(address)?.code_hash)
    }

    pub fn account_code(&mut self, address: Address) -> Result<Code, VMError> {
        let state = self.load_account(address)?;
        if !state.has_code() {
            return Ok(Code::default());
        }
        if let Some(code) = self.code_cache.get(&state.code_hash) {
            return Ok(code.clone());
        }
        let code = self.store.get_account_code(state.code_hash)?;
        self.code_cache.insert(state.code_hash, code.clone());
        Ok(code)
    }

    pub fn code_length(&mut self, address: Address) -> Result<usize, VMError> {
        Ok(self.account_code(address)?.len())
    }

    /// Deploy code at `address`. Deployment happens at most once per
    /// account, so the previous hash is the empty-code hash except when a
    /// rollback already restored it.
    pub fn set_code(&mut self, address: Address, code: Code) -> Result<(), VMError> {
        let hash = code.hash;
        self.code_cache.insert(hash, code);
        let account = self.account_mut(address)?;
        let prev_hash = account.code_hash;
        account.code_hash = hash;
        self.journal
            .record(JournalEntry::CodeChange { address, prev_hash });
        Ok(())
    }

    pub fn account_is_empty(&mut self, address: Address) -> Result<bool, VMError> {
        Ok(self.load_account(address)?.is_empty())
    }

    /// EIP-161 existence: anything non-empty exists.
    pub fn account_exists(&mut self, address: Address) -> Result<bool, VMError> {
        Ok(!self.load_account(address)?.is_empty())
    }

    /// A CREATE collides when the target has code or a nonzero nonce.
    pub fn create_would_collide(&mut self, address: Address) -> Result<bool, VMError> {
        let state = self.load_account(address)?;
        Ok(state.has_code() || state.nonce > 0)
    }

    // ----- storage -----

    pub fn storage_get(&mut self, address: Address, key: H256) -> Result<U256, VMError> {
        if let Some(value) = self.storage.get(&(address, key)) {
            return Ok(*value);
        }
        let value = self.store.get_storage_value(address, key)?;
        self.storage.insert((address, key), value);
        self.original_storage.entry((address, key)).or_insert(value);
        Ok(value)
    }

    /// Pre-transaction value of a slot, for net gas metering.
    pub fn storage_original(&mut self, address: Address, key: H256) -> Result<U256, VMError> {
        if let Some(value) = self.original_storage.get(&(address, key)) {
            return Ok(*value);
        }
        // First touch this transaction: current backend value is original.
        let value = self.store.get_storage_value(address, key)?;
        self.original_storage.insert((address, key), value);
        Ok(value)
    }

    pub fn storage_set(&mut self, address: Address, key: H256, value: U256) -> Result<(), VMError> {
        let prev = self.storage_get(address, key)?;
        self.journal
            .record(JournalEntry::StorageChange { address, key, prev });
        self.storage.insert((address, key), value);
        Ok(())
    }

    pub fn transient_get(&self, address: Address, key: U256) -> U256 {
        self.transient
            .get(&(address, key))
            .copied()
            .unwrap_or_default()
    }

    pub fn transient_set(&mut self, address: Address, key: U256, value: U256) {
        let prev = self.transient_get(address, key);
        self.journal
            .record(JournalEntry::TransientChange { address, key, prev });
        self.transient.insert((address, key), value);
    }

    // ----- warm/cold tracking -----

    /// Mark an address warm; returns whether it was cold.
    pub fn warm_account(&mut self, address: Address) -> bool {
        let was_cold = self.warm_addresses.insert(address);
        if was_cold {
            self.journal.record(JournalEntry::WarmAddress { address });
        }
        was_cold
    }

    /// Mark a storage slot warm; returns whether it was cold.
    pub fn warm_slot(&mut self, address: Address, key: H256) -> bool {
        let was_cold = self.warm_slots.insert((address, key));
        if was_cold {
            self.journal.record(JournalEntry::WarmSlot { address, key });
        }
        was_cold
    }

    // ----- logs, refunds, creation and destruction -----

    pub fn emit_log(&mut self, log: Log) {
        self.journal.record(JournalEntry::LogEmitted);
        self.logs.push(log);
    }

    pub fn take_logs(&mut self) -> Vec<Log> {
        std::mem::take(&mut self.logs)
    }

    pub fn mark_created(&mut self, address: Address) {
        if self.created_accounts.insert(address) {
            self.journal.record(JournalEntry::AccountCreated { address });
        }
    }

    pub fn is_account_created(&self, address: Address) -> bool {
        self.created_accounts.contains(&address)
    }

    /// Queue an account for end-of-transaction deletion. Returns whether it
    /// was already queued.
    pub fn register_selfdestruct(&mut self, address: Address) -> bool {
        let newly = self.selfdestructs.insert(address);
        if newly {
            self.journal
                .record(JournalEntry::SelfdestructRegistered { address });
        }
        !newly
    }

    pub fn add_refund(&mut self, amount: u64) {
        let prev = self.refund;
        self.refund = self
            .refund
            .saturating_add(i64::try_from(amount).unwrap_or(i64::MAX));
        self.journal.record(JournalEntry::RefundChange { prev });
    }

    /// Net metering can also retract previously granted refunds.
    pub fn remove_refund(&mut self, amount: u64) {
        let prev = self.refund;
        self.refund = self
            .refund
            .saturating_sub(i64::try_from(amount).unwrap_or(i64::MAX));
        self.journal.record(JournalEntry::RefundChange { prev });
    }

    pub fn refunded_gas(&self) -> u64 {
        u64::try_from(self.refund.max(0)).unwrap_or(0)
    }

    // ----- snapshots -----

    pub fn snapshot(&self) -> usize {
        self.journal.snapshot()
    }

    pub fn commit(&mut self, snapshot: usize) {
        self.journal.commit(snapshot);
    }

    /// Undo everything since `snapshot`, strictly newest-first.
    pub fn rollback(&mut self, snapshot: usize) {
        while let Some(entry) = self.journal.pop_past(snapshot) {
            self.apply_inverse(entry);
        }
    }

    fn apply_inverse(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::BalanceChange { address, prev } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.balance = prev;
                }
            }
            JournalEntry::NonceChange { address, prev } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.nonce = prev;
                }
            }
            JournalEntry::StorageChange { address, key, prev } => {
                self.storage.insert((address, key), prev);
            }
            JournalEntry::TransientChange { address, key, prev } => {
                self.transient.insert((address, key), prev);
            }
            JournalEntry::CodeChange { address, prev_hash } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.code_hash = prev_hash;
                }
            }
            JournalEntry::AccountCreated { address } => {
                self.created_accounts.remove(&address);
            }
            JournalEntry::WarmAddress { address } => {
                self.warm_addresses.remove(&address);
            }
            JournalEntry::WarmSlot { address, key } => {
                self.warm_slots.remove(&(address, key));
            }
            JournalEntry::SelfdestructRegistered { address } => {
                self.selfdestructs.remove(&address);
            }
            JournalEntry::LogEmitted => {
                self.logs.pop();
            }
            JournalEntry::RefundChange { prev } => {
                self.refund = prev;
            }
        }
    }

    // ----- misc queries -----

    pub fn block_hash(&self, block_number: u64) -> Result<H256, VMError> {
        Ok(self.store.get_block_hash(block_number)?)
    }

    /// Analysis for a piece of code, cached by `(code hash, fork)`. Init
    /// code carries a zeroed hash and is analysed uncached.
    pub fn analysis(&mut self, code: &Code, fork: Fork) -> Rc<CodeAnalysis> {
        if code.hash.is_zero() {
            return Rc::new(CodeAnalysis::analyze(&code.bytecode, fork));
        }
        if let Some(analysis) = self.analysis_cache.get(&(code.hash, fork)) {
            return Rc::clone(analysis);
        }
        let analysis = Rc::new(CodeAnalysis::analyze(&code.bytecode, fork));
        self.analysis_cache
            .insert((code.hash, fork), Rc::clone(&analysis));
        analysis
    }

    /// Settle a finished transaction: the journal's deltas become final,
    /// and everything transaction-scoped (transient storage, warm sets,
    /// created-account tracking, the refund counter) resets. After this
    /// the journal is empty.
    pub fn finish_transaction(&mut self) {
        self.journal.clear();
        self.transient.clear();
        self.warm_addresses.clear();
        self.warm_slots.clear();
        self.created_accounts.clear();
        self.original_storage.clear();
        self.refund = 0;
    }

    /// Finalise queued self-destructs: wipe each account. Slot-level
    /// clearing is the embedder's concern when it applies the account drop.
    pub fn process_selfdestructs(&mut self) {
        let addresses: Vec<Address> = self.selfdestructs.drain().collect();
        for address in addresses {
            self.accounts.insert(address, AccountState::default());
            self.storage.retain(|(a, _), _| *a != address);
        }
    }

    /// Current (possibly dirty) account view, for embedders and tests.
    pub fn account_state(&mut self, address: Address) -> Result<AccountState, VMError> {
        Ok(self.load_account(address)?)
    }

    /// Current (possibly dirty) storage view, for embedders and tests.
    pub fn storage_value(&mut self, address: Address, key: H256) -> Result<U256, VMError> {
        self.storage_get(address, key)
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    pub fn journal_entries_since(&self, snapshot: usize) -> &[JournalEntry] {
        self.journal.entries_since(snapshot)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::db::InMemoryDatabase;
    use bytes::Bytes;

    fn host() -> Host {
        let mut db = InMemoryDatabase::new();
        db.add_account(
            Address::from_low_u64_be(1),
            U256::from(1000),
            1,
            Bytes::new(),
        );
        Host::new(Arc::new(db))
    }

    #[test]
    fn rollback_restores_balances_nonces_and_storage() {
        let mut host = host();
        let account = Address::from_low_u64_be(1);
        let other = Address::from_low_u64_be(2);
        let key = H256::from_low_u64_be(7);

        let snapshot = host.snapshot();
        host.transfer(account, other, U256::from(300)).unwrap();
        host.increment_nonce(account).unwrap();
        host.storage_set(account, key, U256::from(99)).unwrap();
        host.emit_log(Log {
            address: account,
            topics: vec![],
            data: Bytes::new(),
        });
        host.add_refund(100);

        host.rollback(snapshot);

        assert_eq!(host.balance(account).unwrap(), U256::from(1000));
        assert_eq!(host.balance(other).unwrap(), U256::zero());
        assert_eq!(host.nonce(account).unwrap(), 1);
        assert_eq!(host.storage_get(account, key).unwrap(), U256::zero());
        assert!(host.take_logs().is_empty());
        assert_eq!(host.refunded_gas(), 0);
        assert!(host.journal_len() == snapshot);
    }

    #[test]
    fn rollback_is_idempotent_and_sums_to_zero() {
        let mut host = host();
        let account = Address::from_low_u64_be(1);
        let key = H256::from_low_u64_be(1);

        let snapshot = host.snapshot();
        for round in 0..10u64 {
            host.storage_set(account, key, U256::from(round)).unwrap();
            host.add_balance(account, U256::from(1)).unwrap();
        }
        host.rollback(snapshot);
        host.rollback(snapshot);

        assert_eq!(host.storage_get(account, key).unwrap(), U256::zero());
        assert_eq!(host.balance(account).unwrap(), U256::from(1000));
    }

    #[test]
    fn warm_tracking_reverts_with_the_journal() {
        let mut host = host();
        let address = Address::from_low_u64_be(9);
        let key = H256::from_low_u64_be(1);

        let snapshot = host.snapshot();
        assert!(host.warm_account(address));
        assert!(!host.warm_account(address));
        assert!(host.warm_slot(address, key));

        host.rollback(snapshot);
        // Cold again after the revert.
        assert!(host.warm_account(address));
        assert!(host.warm_slot(address, key));
    }

    #[test]
    fn nested_snapshots_commit_inner_revert_outer() {
        let mut host = host();
        let account = Address::from_low_u64_be(1);
        let key = H256::from_low_u64_be(3);

        let outer = host.snapshot();
        host.storage_set(account, key, U256::from(1)).unwrap();
        let inner = host.snapshot();
        host.storage_set(account, key, U256::from(2)).unwrap();
        host.commit(inner);
        assert_eq!(host.storage_get(account, key).unwrap(), U256::from(2));

        host.rollback(outer);
        assert_eq!(host.storage_get(account, key).unwrap(), U256::zero());
    }

    #[test]
    fn original_storage_is_first_seen_value() {
        let mut db = InMemoryDatabase::new();
        let account = Address::from_low_u64_be(5);
        let key = H256::from_low_u64_be(0);
        db.add_account(account, U256::zero(), 0, Bytes::new());
        db.set_storage(account, key, U256::from(42));
        let mut host = Host::new(Arc::new(db));

        host.storage_set(account, key, U256::from(1)).unwrap();
        host.storage_set(account, key, U256::from(2)).unwrap();
        assert_eq!(host.storage_original(account, key).unwrap(), U256::from(42));
        assert_eq!(host.storage_get(account, key).unwrap(), U256::from(2));
    }
}
