//! Gas constants and dynamic cost formulas.
//!
//! Constant per-opcode costs live in the dispatch table and are charged by
//! block-entry accounting (or per instruction in the reference loop); the
//! functions here compute only the operand-dependent parts that handlers
//! charge themselves.

use crate::{constants::WORD_SIZE_IN_BYTES_U64, errors::ExceptionalHalt, gas_schedule::GasSchedule};
use kestrel_common::U256;

// Constant costs, Yellow Paper appendix G tiers.
pub const STOP: u64 = 0;
pub const ADD: u64 = 3;
pub const MUL: u64 = 5;
pub const SUB: u64 = 3;
pub const DIV: u64 = 5;
pub const SDIV: u64 = 5;
pub const MOD: u64 = 5;
pub const SMOD: u64 = 5;
pub const ADDMOD: u64 = 8;
pub const MULMOD: u64 = 8;
pub const EXP: u64 = 10;
pub const SIGNEXTEND: u64 = 5;
pub const LT: u64 = 3;
pub const GT: u64 = 3;
pub const SLT: u64 = 3;
pub const SGT: u64 = 3;
pub const EQ: u64 = 3;
pub const ISZERO: u64 = 3;
pub const AND: u64 = 3;
pub const OR: u64 = 3;
pub const XOR: u64 = 3;
pub const NOT: u64 = 3;
pub const BYTE: u64 = 3;
pub const SHL: u64 = 3;
pub const SHR: u64 = 3;
pub const SAR: u64 = 3;

pub const KECCAK256_STATIC: u64 = 30;
pub const KECCAK256_WORD: u64 = 6;

pub const ADDRESS: u64 = 2;
pub const ORIGIN: u64 = 2;
pub const CALLER: u64 = 2;
pub const CALLVALUE: u64 = 2;
pub const CALLDATALOAD: u64 = 3;
pub const CALLDATASIZE: u64 = 2;
pub const CALLDATACOPY_STATIC: u64 = 3;
pub const CODESIZE: u64 = 2;
pub const CODECOPY_STATIC: u64 = 3;
pub const GASPRICE: u64 = 2;
pub const RETURNDATASIZE: u64 = 2;
pub const RETURNDATACOPY_STATIC: u64 = 3;
pub const COPY_WORD: u64 = 3;

pub const BLOCKHASH: u64 = 20;
pub const COINBASE: u64 = 2;
pub const TIMESTAMP: u64 = 2;
pub const NUMBER: u64 = 2;
pub const PREVRANDAO: u64 = 2;
pub const GASLIMIT: u64 = 2;
pub const CHAINID: u64 = 2;
pub const SELFBALANCE: u64 = 5;
pub const BASEFEE: u64 = 2;
pub const BLOBHASH: u64 = 3;
pub const BLOBBASEFEE: u64 = 2;

pub const POP: u64 = 2;
pub const MLOAD_STATIC: u64 = 3;
pub const MSTORE_STATIC: u64 = 3;
pub const MSTORE8_STATIC: u64 = 3;
pub const JUMP: u64 = 8;
pub const JUMPI: u64 = 10;
pub const PC: u64 = 2;
pub const MSIZE: u64 = 2;
pub const GAS: u64 = 2;
pub const JUMPDEST: u64 = 1;
pub const TLOAD: u64 = 100;
pub const TSTORE: u64 = 100;
pub const MCOPY_STATIC: u64 = 3;

pub const PUSH0: u64 = 2;
pub const PUSHN: u64 = 3;
pub const DUPN: u64 = 3;
pub const SWAPN: u64 = 3;

pub const LOG_STATIC: u64 = 375;
pub const LOG_TOPIC: u64 = 375;
pub const LOG_BYTE: u64 = 8;

pub const CREATE_STATIC: u64 = 32000;
pub const INIT_CODE_WORD: u64 = 2;
pub const CODE_DEPOSIT_BYTE: u64 = 200;

pub const CALL_POSITIVE_VALUE: u64 = 9000;
pub const CALL_STIPEND: u64 = 2300;

/// EIP-2200: SSTORE refuses to run with this much gas or less remaining.
pub const SSTORE_SENTRY: u64 = 2300;

#[inline]
fn words(size: usize) -> Result<u64, ExceptionalHalt> {
    let size = u64::try_from(size).map_err(|_| ExceptionalHalt::OutOfGas)?;
    Ok(size.div_ceil(WORD_SIZE_IN_BYTES_U64))
}

/// KECCAK256 per-word component.
#[inline]
pub fn keccak256_words(size: usize) -> Result<u64, ExceptionalHalt> {
    words(size)?
        .checked_mul(KECCAK256_WORD)
        .ok_or(ExceptionalHalt::OutOfGas)
}

/// Per-word component shared by the *COPY opcodes.
#[inline]
pub fn copy_words(size: usize) -> Result<u64, ExceptionalHalt> {
    words(size)?
        .checked_mul(COPY_WORD)
        .ok_or(ExceptionalHalt::OutOfGas)
}

/// EXP dynamic component: per-byte cost of the exponent's minimal
/// big-endian representation.
#[inline]
pub fn exp_dynamic(exponent: U256, schedule: &GasSchedule) -> Result<u64, ExceptionalHalt> {
    let exponent_byte_size =
        u64::try_from(exponent.bits().div_ceil(8)).map_err(|_| ExceptionalHalt::OutOfGas)?;
    exponent_byte_size
        .checked_mul(schedule.exp_byte)
        .ok_or(ExceptionalHalt::OutOfGas)
}

/// LOGn dynamic component: topics and data bytes.
#[inline]
pub fn log_dynamic(topic_count: u64, size: usize) -> Result<u64, ExceptionalHalt> {
    let data_cost = u64::try_from(size)
        .map_err(|_| ExceptionalHalt::OutOfGas)?
        .checked_mul(LOG_BYTE)
        .ok_or(ExceptionalHalt::OutOfGas)?;
    topic_count
        .checked_mul(LOG_TOPIC)
        .and_then(|topics| topics.checked_add(data_cost))
        .ok_or(ExceptionalHalt::OutOfGas)
}

/// EIP-3860 init-code word cost (Shanghai+).
#[inline]
pub fn init_code_words(size: usize) -> Result<u64, ExceptionalHalt> {
    words(size)?
        .checked_mul(INIT_CODE_WORD)
        .ok_or(ExceptionalHalt::OutOfGas)
}

/// Deployment charge for the returned runtime code.
#[inline]
pub fn code_deposit(len: usize) -> Result<u64, ExceptionalHalt> {
    u64::try_from(len)
        .map_err(|_| ExceptionalHalt::OutOfGas)?
        .checked_mul(CODE_DEPOSIT_BYTE)
        .ok_or(ExceptionalHalt::OutOfGas)
}

/// Gas a frame may forward to a child it spawns itself (CREATE and the
/// all-remaining-gas side of the CALL computation): all but 1/64th from
/// Tangerine Whistle on, everything before that.
#[inline]
pub fn max_message_call_gas(gas_remaining: u64, schedule: &GasSchedule) -> u64 {
    if schedule.has_63_64_rule {
        gas_remaining.wrapping_sub(gas_remaining / 64)
    } else {
        gas_remaining
    }
}

/// Resolve the gas operand of a CALL-family opcode against the caller's
/// remaining gas. Pre-EIP-150 a request above the available gas is an
/// out-of-gas failure; from Tangerine Whistle it is capped at 63/64.
#[inline]
pub fn requested_call_gas(
    requested: U256,
    available: u64,
    schedule: &GasSchedule,
) -> Result<u64, ExceptionalHalt> {
    let capped = max_message_call_gas(available, schedule);
    match u64::try_from(requested) {
        Ok(requested) if requested <= capped => Ok(requested),
        // Larger requests take the cap from EIP-150 on, and fail before it.
        _ if schedule.has_63_64_rule => Ok(capped),
        _ => Err(ExceptionalHalt::OutOfGas),
    }
}
