use crate::errors::DatabaseError;
use bytes::Bytes;
use kestrel_common::{
    Address, H256, U256,
    types::{AccountState, Code, EMPTY_KECCAK_HASH},
};
use rustc_hash::FxHashMap;

/// Read-only world-state backend.
///
/// The interpreter never writes through this trait; all mutation happens in
/// the journaled [`crate::host::Host`] layer and is handed back to the
/// embedder when execution settles.
pub trait Database: Send + Sync {
    fn get_account_state(&self, address: Address) -> Result<AccountState, DatabaseError>;
    fn get_storage_value(&self, address: Address, key: H256) -> Result<U256, DatabaseError>;
    fn get_block_hash(&self, block_number: u64) -> Result<H256, DatabaseError>;
    fn get_account_code(&self, code_hash: H256) -> Result<Code, DatabaseError>;
}

/// Map-backed backend for tests and embedders without a real store.
/// Missing accounts and slots read as empty/zero.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    pub accounts: FxHashMap<Address, AccountState>,
    pub storage: FxHashMap<(Address, H256), U256>,
    pub code: FxHashMap<H256, Code>,
    pub block_hashes: FxHashMap<u64, H256>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an account with the given balance, nonce and code.
    pub fn add_account(&mut self, address: Address, balance: U256, nonce: u64, code: Bytes) {
        let code = Code::from_bytecode(code);
        let state = AccountState {
            balance,
            nonce,
            code_hash: code.hash,
        };
        if !code.is_empty() {
            self.code.insert(code.hash, code);
        }
        self.accounts.insert(address, state);
    }

    /// Builder-style variant of [`Self::add_account`].
    pub fn with_account(mut self, address: Address, balance: U256, nonce: u64, code: Bytes) -> Self {
        self.add_account(address, balance, nonce, code);
        self
    }

    pub fn set_storage(&mut self, address: Address, key: H256, value: U256) {
        self.storage.insert((address, key), value);
    }
}

impl Database for InMemoryDatabase {
    fn get_account_state(&self, address: Address) -> Result<AccountState, DatabaseError> {
        Ok(self.accounts.get(&address).copied().unwrap_or_default())
    }

    fn get_storage_value(&self, address: Address, key: H256) -> Result<U256, DatabaseError> {
        Ok(self
            .storage
            .get(&(address, key))
            .copied()
            .unwrap_or_default())
    }

    fn get_block_hash(&self, block_number: u64) -> Result<H256, DatabaseError> {
        Ok(self
            .block_hashes
            .get(&block_number)
            .copied()
            .unwrap_or_default())
    }

    fn get_account_code(&self, code_hash: H256) -> Result<Code, DatabaseError> {
        if code_hash == EMPTY_KECCAK_HASH || code_hash.is_zero() {
            return Ok(Code::default());
        }
        self.code
            .get(&code_hash)
            .cloned()
            .ok_or_else(|| DatabaseError::Custom(format!("unknown code hash {code_hash:#x}")))
    }
}
