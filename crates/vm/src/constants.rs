use kestrel_common::U256;

pub const WORD_SIZE_IN_BYTES_USIZE: usize = 32;
pub const WORD_SIZE_IN_BYTES_U64: u64 = 32;

/// Operand stack capacity.
pub const STACK_LIMIT: usize = 1024;

/// EIP-170 deployed-code size cap.
pub const MAX_CODE_SIZE: usize = 0x6000;

/// EIP-3860 init-code size cap (Shanghai+).
pub const INIT_CODE_MAX_SIZE: usize = 49152;

/// Divisor in the quadratic memory expansion cost.
pub const MEMORY_EXPANSION_QUOTIENT: u64 = 512;

/// BLOCKHASH reaches at most this many blocks back.
pub const LAST_AVAILABLE_BLOCK_LIMIT: u64 = 256;

/// EIP-3541 rejects deployed code starting with this byte (London+).
pub const EOF_PREFIX: u8 = 0xEF;

/// Version byte of KZG versioned hashes (EIP-4844).
pub const VERSIONED_HASH_VERSION_KZG: u8 = 0x01;

/// Word pushed by CALL-family opcodes on success.
pub const SUCCESS: U256 = U256([1, 0, 0, 0]);
/// Word pushed by CALL-family opcodes on failure.
pub const FAIL: U256 = U256([0, 0, 0, 0]);

pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;
pub const DEFAULT_MEMORY_LIMIT: usize = 32 * 1024 * 1024;
pub const DEFAULT_INITIAL_MEMORY_CAPACITY: usize = 4 * 1024;
