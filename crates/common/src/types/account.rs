use super::code::EMPTY_KECCAK_HASH;
use ethereum_types::{H256, U256};

/// The balance/nonce/code-hash triple stored per account.
///
/// Storage lives in its own keyed map; code bytes are resolved through the
/// code hash. `Copy` keeps cache lookups allocation-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountState {
    pub balance: U256,
    pub nonce: u64,
    pub code_hash: H256,
}

impl AccountState {
    /// True when the account is empty per EIP-161: zero balance, zero nonce
    /// and no code.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero() && self.nonce == 0 && self.code_hash == EMPTY_KECCAK_HASH
    }

    pub fn has_code(&self) -> bool {
        self.code_hash != EMPTY_KECCAK_HASH
    }
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            balance: U256::zero(),
            nonce: 0,
            code_hash: EMPTY_KECCAK_HASH,
        }
    }
}
