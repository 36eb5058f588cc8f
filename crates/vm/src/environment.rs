use crate::{
    constants::{DEFAULT_INITIAL_MEMORY_CAPACITY, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MEMORY_LIMIT},
    shadow::ShadowMode,
};
use kestrel_common::{Address, H256, U256, types::Fork};

/// Block and transaction context supplied by the embedder.
///
/// The interpreter never derives any of this itself; BLOCKHASH is the only
/// block query that goes through the database backend.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub origin: Address,
    pub gas_price: U256,
    pub gas_limit: u64,

    pub block_number: u64,
    pub coinbase: Address,
    pub timestamp: u64,
    /// DIFFICULTY before Paris.
    pub difficulty: U256,
    /// PREVRANDAO from Paris on (EIP-4399).
    pub prev_randao: Option<H256>,
    pub block_gas_limit: u64,
    pub chain_id: U256,
    pub base_fee_per_gas: U256,
    pub base_blob_fee_per_gas: U256,
    pub tx_blob_hashes: Vec<H256>,

    /// EIP-2930-style entries pre-warmed at execution entry.
    pub access_list: Vec<(Address, Vec<H256>)>,

    pub config: EVMConfig,
}

/// Interpreter configuration options.
#[derive(Debug, Clone)]
pub struct EVMConfig {
    /// Selects the dispatch table and the gas schedule variant.
    pub fork: Fork,
    pub max_call_depth: usize,
    /// Byte cap for one frame tree's memory.
    pub memory_limit: usize,
    pub initial_memory_capacity: usize,
    pub shadow: ShadowMode,
    /// Escalate the first shadow mismatch to a debug assertion.
    pub shadow_fail_fast: bool,
    /// Disable precompile dispatch entirely (testing).
    pub no_precompiles: bool,
}

impl EVMConfig {
    pub fn new(fork: Fork) -> Self {
        Self {
            fork,
            ..Default::default()
        }
    }
}

impl Default for EVMConfig {
    fn default() -> Self {
        Self {
            fork: Fork::default(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            initial_memory_capacity: DEFAULT_INITIAL_MEMORY_CAPACITY,
            shadow: ShadowMode::Off,
            shadow_fail_fast: false,
            no_precompiles: false,
        }
    }
}
