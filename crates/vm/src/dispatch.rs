//! Per-hardfork opcode dispatch tables.
//!
//! Stored struct-of-arrays: the hot fields (`handlers`, `base_gas`) sit in
//! their own arrays so the interpreter's fetch touches as few cache lines as
//! possible; validation-only metadata lives in the cold arrays.
//!
//! Construction walks a fork-ordered spec list and, for every opcode, keeps
//! the latest variant whose fork is at or below the target. Bytes without a
//! surviving spec stay undefined: their handler raises `InvalidOpcode` and
//! the analysis pass treats them as block terminators.

use crate::{
    errors::{OpcodeResult, VMError},
    gas_cost,
    opcodes::Opcode,
    vm::VM,
};
use kestrel_common::types::Fork;
use lazy_static::lazy_static;

/// An opcode handler. Handlers run against the current call frame and charge
/// only operand-dependent gas; the constant part is accounted by the caller
/// (block entry in the main loop, per instruction in the reference loop).
pub type OpFn = fn(&mut VM) -> Result<OpcodeResult, VMError>;

/// One opcode variant: the byte it occupies, the fork that introduced (or
/// repriced) it, and its execution metadata.
struct OpcodeSpec {
    opcode: Opcode,
    fork: Fork,
    handler: OpFn,
    base_gas: u64,
    min_stack: u16,
    outputs: u16,
    dynamic_gas: bool,
    memory_size: bool,
    terminator: bool,
    ends_block: bool,
}

/// Struct-of-arrays dispatch table for one hardfork.
pub struct DispatchTable {
    // Hot: fetched for every instruction in the reference loop.
    pub handlers: [OpFn; 256],
    pub base_gas: [u64; 256],
    // Cold: validation and analysis metadata.
    pub min_stack: [u16; 256],
    pub outputs: [u16; 256],
    pub has_dynamic_gas: [bool; 256],
    pub touches_memory: [bool; 256],
    pub undefined: [bool; 256],
    /// STOP/RETURN/REVERT/INVALID/SELFDESTRUCT/JUMP/JUMPI.
    pub terminator: [bool; 256],
    /// Terminators plus the gas observers (GAS, CALL family, CREATE family,
    /// SSTORE): analysis closes a basic block after any of these so that
    /// block-charged gas is sequential-exact wherever it can be observed.
    pub ends_block: [bool; 256],
}

impl DispatchTable {
    /// The materialised table for a fork.
    pub fn for_fork(fork: Fork) -> &'static DispatchTable {
        #[expect(clippy::indexing_slicing)] // Fork::index is always in range
        &TABLES[fork.index()]
    }

    /// Net stack growth of an opcode, for overflow checks.
    #[inline]
    pub fn max_growth(&self, opcode: u8) -> u16 {
        let index = usize::from(opcode);
        self.outputs
            .get(index)
            .copied()
            .unwrap_or(0)
            .saturating_sub(self.min_stack.get(index).copied().unwrap_or(0))
    }
}

lazy_static! {
    static ref TABLES: [DispatchTable; 17] = build_all_tables();
}

#[allow(clippy::indexing_slicing)] // Fork::ALL has exactly 17 entries
fn build_all_tables() -> [DispatchTable; 17] {
    std::array::from_fn(|index| build_table(Fork::ALL[index]))
}

#[allow(clippy::indexing_slicing)] // u8-derived indexes into 256-entry arrays
fn build_table(fork: Fork) -> DispatchTable {
    let mut table = DispatchTable {
        handlers: [VM::on_invalid_opcode; 256],
        base_gas: [0; 256],
        min_stack: [0; 256],
        outputs: [0; 256],
        has_dynamic_gas: [false; 256],
        touches_memory: [false; 256],
        undefined: [true; 256],
        terminator: [false; 256],
        // An undefined opcode halts the frame, so nothing after it in a
        // straight line ever runs.
        ends_block: [true; 256],
    };

    for spec in opcode_specs() {
        if spec.fork > fork {
            continue;
        }
        let index = usize::from(u8::from(spec.opcode));
        table.handlers[index] = spec.handler;
        table.base_gas[index] = spec.base_gas;
        table.min_stack[index] = spec.min_stack;
        table.outputs[index] = spec.outputs;
        table.has_dynamic_gas[index] = spec.dynamic_gas;
        table.touches_memory[index] = spec.memory_size;
        table.undefined[index] = false;
        table.terminator[index] = spec.terminator;
        table.ends_block[index] = spec.ends_block;
    }

    // A memory-sized opcode with no dynamic gas cannot charge its expansion;
    // demote such an entry to undefined instead of executing it.
    for index in 0..256 {
        if table.touches_memory[index] && !table.has_dynamic_gas[index] {
            table.handlers[index] = VM::on_invalid_opcode;
            table.base_gas[index] = 0;
            table.min_stack[index] = 0;
            table.outputs[index] = 0;
            table.undefined[index] = true;
            table.terminator[index] = false;
            table.ends_block[index] = true;
        }
    }

    table
}

/// Plain (non-terminating, statically priced) opcode.
fn op(opcode: Opcode, fork: Fork, handler: OpFn, base_gas: u64, min_stack: u16, outputs: u16) -> OpcodeSpec {
    OpcodeSpec {
        opcode,
        fork,
        handler,
        base_gas,
        min_stack,
        outputs,
        dynamic_gas: false,
        memory_size: false,
        terminator: false,
        ends_block: false,
    }
}

/// Opcode whose handler charges operand-dependent gas.
fn dyn_op(opcode: Opcode, fork: Fork, handler: OpFn, base_gas: u64, min_stack: u16, outputs: u16, memory_size: bool) -> OpcodeSpec {
    OpcodeSpec {
        dynamic_gas: true,
        memory_size,
        ..op(opcode, fork, handler, base_gas, min_stack, outputs)
    }
}

/// Control-flow terminator.
fn term_op(opcode: Opcode, fork: Fork, handler: OpFn, base_gas: u64, min_stack: u16, outputs: u16, dynamic_gas: bool, memory_size: bool) -> OpcodeSpec {
    OpcodeSpec {
        dynamic_gas,
        memory_size,
        terminator: true,
        ends_block: true,
        ..op(opcode, fork, handler, base_gas, min_stack, outputs)
    }
}

/// Gas observer: not a terminator, but ends its basic block.
fn gas_obs_op(opcode: Opcode, fork: Fork, handler: OpFn, base_gas: u64, min_stack: u16, outputs: u16, memory_size: bool) -> OpcodeSpec {
    OpcodeSpec {
        dynamic_gas: true,
        memory_size,
        ends_block: true,
        ..op(opcode, fork, handler, base_gas, min_stack, outputs)
    }
}

#[allow(clippy::too_many_lines)]
fn opcode_specs() -> Vec<OpcodeSpec> {
    use Fork::*;
    use Opcode::*;

    let mut specs = vec![
        term_op(STOP, Frontier, VM::op_stop, gas_cost::STOP, 0, 0, false, false),
        op(ADD, Frontier, VM::op_add, gas_cost::ADD, 2, 1),
        op(MUL, Frontier, VM::op_mul, gas_cost::MUL, 2, 1),
        op(SUB, Frontier, VM::op_sub, gas_cost::SUB, 2, 1),
        op(DIV, Frontier, VM::op_div, gas_cost::DIV, 2, 1),
        op(SDIV, Frontier, VM::op_sdiv, gas_cost::SDIV, 2, 1),
        op(MOD, Frontier, VM::op_mod, gas_cost::MOD, 2, 1),
        op(SMOD, Frontier, VM::op_smod, gas_cost::SMOD, 2, 1),
        op(ADDMOD, Frontier, VM::op_addmod, gas_cost::ADDMOD, 3, 1),
        op(MULMOD, Frontier, VM::op_mulmod, gas_cost::MULMOD, 3, 1),
        dyn_op(EXP, Frontier, VM::op_exp, gas_cost::EXP, 2, 1, false),
        op(SIGNEXTEND, Frontier, VM::op_signextend, gas_cost::SIGNEXTEND, 2, 1),
        op(LT, Frontier, VM::op_lt, gas_cost::LT, 2, 1),
        op(GT, Frontier, VM::op_gt, gas_cost::GT, 2, 1),
        op(SLT, Frontier, VM::op_slt, gas_cost::SLT, 2, 1),
        op(SGT, Frontier, VM::op_sgt, gas_cost::SGT, 2, 1),
        op(EQ, Frontier, VM::op_eq, gas_cost::EQ, 2, 1),
        op(ISZERO, Frontier, VM::op_iszero, gas_cost::ISZERO, 1, 1),
        op(AND, Frontier, VM::op_and, gas_cost::AND, 2, 1),
        op(OR, Frontier, VM::op_or, gas_cost::OR, 2, 1),
        op(XOR, Frontier, VM::op_xor, gas_cost::XOR, 2, 1),
        op(NOT, Frontier, VM::op_not, gas_cost::NOT, 1, 1),
        op(BYTE, Frontier, VM::op_byte, gas_cost::BYTE, 2, 1),
        op(SHL, Constantinople, VM::op_shl, gas_cost::SHL, 2, 1),
        op(SHR, Constantinople, VM::op_shr, gas_cost::SHR, 2, 1),
        op(SAR, Constantinople, VM::op_sar, gas_cost::SAR, 2, 1),
        dyn_op(KECCAK256, Frontier, VM::op_keccak256, gas_cost::KECCAK256_STATIC, 2, 1, true),
        op(ADDRESS, Frontier, VM::op_address, gas_cost::ADDRESS, 0, 1),
        dyn_op(BALANCE, Frontier, VM::op_balance, 0, 1, 1, false),
        op(ORIGIN, Frontier, VM::op_origin, gas_cost::ORIGIN, 0, 1),
        op(CALLER, Frontier, VM::op_caller, gas_cost::CALLER, 0, 1),
        op(CALLVALUE, Frontier, VM::op_callvalue, gas_cost::CALLVALUE, 0, 1),
        op(CALLDATALOAD, Frontier, VM::op_calldataload, gas_cost::CALLDATALOAD, 1, 1),
        op(CALLDATASIZE, Frontier, VM::op_calldatasize, gas_cost::CALLDATASIZE, 0, 1),
        dyn_op(CALLDATACOPY, Frontier, VM::op_calldatacopy, gas_cost::CALLDATACOPY_STATIC, 3, 0, true),
        op(CODESIZE, Frontier, VM::op_codesize, gas_cost::CODESIZE, 0, 1),
        dyn_op(CODECOPY, Frontier, VM::op_codecopy, gas_cost::CODECOPY_STATIC, 3, 0, true),
        op(GASPRICE, Frontier, VM::op_gasprice, gas_cost::GASPRICE, 0, 1),
        dyn_op(EXTCODESIZE, Frontier, VM::op_extcodesize, 0, 1, 1, false),
        dyn_op(EXTCODECOPY, Frontier, VM::op_extcodecopy, 0, 4, 0, true),
        op(RETURNDATASIZE, Byzantium, VM::op_returndatasize, gas_cost::RETURNDATASIZE, 0, 1),
        dyn_op(RETURNDATACOPY, Byzantium, VM::op_returndatacopy, gas_cost::RETURNDATACOPY_STATIC, 3, 0, true),
        dyn_op(EXTCODEHASH, Constantinople, VM::op_extcodehash, 0, 1, 1, false),
        op(BLOCKHASH, Frontier, VM::op_blockhash, gas_cost::BLOCKHASH, 1, 1),
        op(COINBASE, Frontier, VM::op_coinbase, gas_cost::COINBASE, 0, 1),
        op(TIMESTAMP, Frontier, VM::op_timestamp, gas_cost::TIMESTAMP, 0, 1),
        op(NUMBER, Frontier, VM::op_number, gas_cost::NUMBER, 0, 1),
        op(PREVRANDAO, Frontier, VM::op_prevrandao, gas_cost::PREVRANDAO, 0, 1),
        op(GASLIMIT, Frontier, VM::op_gaslimit, gas_cost::GASLIMIT, 0, 1),
        op(CHAINID, Istanbul, VM::op_chainid, gas_cost::CHAINID, 0, 1),
        op(SELFBALANCE, Istanbul, VM::op_selfbalance, gas_cost::SELFBALANCE, 0, 1),
        op(BASEFEE, London, VM::op_basefee, gas_cost::BASEFEE, 0, 1),
        op(BLOBHASH, Cancun, VM::op_blobhash, gas_cost::BLOBHASH, 1, 1),
        op(BLOBBASEFEE, Cancun, VM::op_blobbasefee, gas_cost::BLOBBASEFEE, 0, 1),
        op(POP, Frontier, VM::op_pop, gas_cost::POP, 1, 0),
        dyn_op(MLOAD, Frontier, VM::op_mload, gas_cost::MLOAD_STATIC, 1, 1, true),
        dyn_op(MSTORE, Frontier, VM::op_mstore, gas_cost::MSTORE_STATIC, 2, 0, true),
        dyn_op(MSTORE8, Frontier, VM::op_mstore8, gas_cost::MSTORE8_STATIC, 2, 0, true),
        dyn_op(SLOAD, Frontier, VM::op_sload, 0, 1, 1, false),
        gas_obs_op(SSTORE, Frontier, VM::op_sstore, 0, 2, 0, false),
        term_op(JUMP, Frontier, VM::op_jump, gas_cost::JUMP, 1, 0, false, false),
        term_op(JUMPI, Frontier, VM::op_jumpi, gas_cost::JUMPI, 2, 0, false, false),
        op(PC, Frontier, VM::op_pc, gas_cost::PC, 0, 1),
        op(MSIZE, Frontier, VM::op_msize, gas_cost::MSIZE, 0, 1),
        op(JUMPDEST, Frontier, VM::op_jumpdest, gas_cost::JUMPDEST, 0, 0),
        op(TLOAD, Cancun, VM::op_tload, gas_cost::TLOAD, 1, 1),
        op(TSTORE, Cancun, VM::op_tstore, gas_cost::TSTORE, 2, 0),
        dyn_op(MCOPY, Cancun, VM::op_mcopy, gas_cost::MCOPY_STATIC, 3, 0, true),
        op(PUSH0, Shanghai, VM::op_push0, gas_cost::PUSH0, 0, 1),
        term_op(INVALID, Frontier, VM::op_invalid, 0, 0, 0, false, false),
        term_op(SELFDESTRUCT, Frontier, VM::op_selfdestruct, 0, 1, 0, true, false),
        gas_obs_op(CREATE, Frontier, VM::op_create, gas_cost::CREATE_STATIC, 3, 1, true),
        gas_obs_op(CREATE2, Constantinople, VM::op_create2, gas_cost::CREATE_STATIC, 4, 1, true),
        gas_obs_op(CALL, Frontier, VM::op_call, 0, 7, 1, true),
        gas_obs_op(CALLCODE, Frontier, VM::op_callcode, 0, 7, 1, true),
        gas_obs_op(DELEGATECALL, Homestead, VM::op_delegatecall, 0, 6, 1, true),
        gas_obs_op(STATICCALL, Byzantium, VM::op_staticcall, 0, 6, 1, true),
        term_op(RETURN, Frontier, VM::op_return, 0, 2, 0, true, true),
        term_op(REVERT, Byzantium, VM::op_revert, 0, 2, 0, true, true),
        // GAS pushes the post-charge remaining gas, so its block must end
        // with it.
        OpcodeSpec {
            ends_block: true,
            ..op(GAS, Frontier, VM::op_gas, gas_cost::GAS, 0, 1)
        },
    ];

    specs.extend([
        op(PUSH1, Frontier, VM::op_push::<1>, gas_cost::PUSHN, 0, 1),
        op(PUSH2, Frontier, VM::op_push::<2>, gas_cost::PUSHN, 0, 1),
        op(PUSH3, Frontier, VM::op_push::<3>, gas_cost::PUSHN, 0, 1),
        op(PUSH4, Frontier, VM::op_push::<4>, gas_cost::PUSHN, 0, 1),
        op(PUSH5, Frontier, VM::op_push::<5>, gas_cost::PUSHN, 0, 1),
        op(PUSH6, Frontier, VM::op_push::<6>, gas_cost::PUSHN, 0, 1),
        op(PUSH7, Frontier, VM::op_push::<7>, gas_cost::PUSHN, 0, 1),
        op(PUSH8, Frontier, VM::op_push::<8>, gas_cost::PUSHN, 0, 1),
        op(PUSH9, Frontier, VM::op_push::<9>, gas_cost::PUSHN, 0, 1),
        op(PUSH10, Frontier, VM::op_push::<10>, gas_cost::PUSHN, 0, 1),
        op(PUSH11, Frontier, VM::op_push::<11>, gas_cost::PUSHN, 0, 1),
        op(PUSH12, Frontier, VM::op_push::<12>, gas_cost::PUSHN, 0, 1),
        op(PUSH13, Frontier, VM::op_push::<13>, gas_cost::PUSHN, 0, 1),
        op(PUSH14, Frontier, VM::op_push::<14>, gas_cost::PUSHN, 0, 1),
        op(PUSH15, Frontier, VM::op_push::<15>, gas_cost::PUSHN, 0, 1),
        op(PUSH16, Frontier, VM::op_push::<16>, gas_cost::PUSHN, 0, 1),
        op(PUSH17, Frontier, VM::op_push::<17>, gas_cost::PUSHN, 0, 1),
        op(PUSH18, Frontier, VM::op_push::<18>, gas_cost::PUSHN, 0, 1),
        op(PUSH19, Frontier, VM::op_push::<19>, gas_cost::PUSHN, 0, 1),
        op(PUSH20, Frontier, VM::op_push::<20>, gas_cost::PUSHN, 0, 1),
        op(PUSH21, Frontier, VM::op_push::<21>, gas_cost::PUSHN, 0, 1),
        op(PUSH22, Frontier, VM::op_push::<22>, gas_cost::PUSHN, 0, 1),
        op(PUSH23, Frontier, VM::op_push::<23>, gas_cost::PUSHN, 0, 1),
        op(PUSH24, Frontier, VM::op_push::<24>, gas_cost::PUSHN, 0, 1),
        op(PUSH25, Frontier, VM::op_push::<25>, gas_cost::PUSHN, 0, 1),
        op(PUSH26, Frontier, VM::op_push::<26>, gas_cost::PUSHN, 0, 1),
        op(PUSH27, Frontier, VM::op_push::<27>, gas_cost::PUSHN, 0, 1),
        op(PUSH28, Frontier, VM::op_push::<28>, gas_cost::PUSHN, 0, 1),
        op(PUSH29, Frontier, VM::op_push::<29>, gas_cost::PUSHN, 0, 1),
        op(PUSH30, Frontier, VM::op_push::<30>, gas_cost::PUSHN, 0, 1),
        op(PUSH31, Frontier, VM::op_push::<31>, gas_cost::PUSHN, 0, 1),
        op(PUSH32, Frontier, VM::op_push::<32>, gas_cost::PUSHN, 0, 1),
    ]);

    specs.extend([
        op(DUP1, Frontier, VM::op_dup::<0>, gas_cost::DUPN, 1, 2),
        op(DUP2, Frontier, VM::op_dup::<1>, gas_cost::DUPN, 2, 3),
        op(DUP3, Frontier, VM::op_dup::<2>, gas_cost::DUPN, 3, 4),
        op(DUP4, Frontier, VM::op_dup::<3>, gas_cost::DUPN, 4, 5),
        op(DUP5, Frontier, VM::op_dup::<4>, gas_cost::DUPN, 5, 6),
        op(DUP6, Frontier, VM::op_dup::<5>, gas_cost::DUPN, 6, 7),
        op(DUP7, Frontier, VM::op_dup::<6>, gas_cost::DUPN, 7, 8),
        op(DUP8, Frontier, VM::op_dup::<7>, gas_cost::DUPN, 8, 9),
        op(DUP9, Frontier, VM::op_dup::<8>, gas_cost::DUPN, 9, 10),
        op(DUP10, Frontier, VM::op_dup::<9>, gas_cost::DUPN, 10, 11),
        op(DUP11, Frontier, VM::op_dup::<10>, gas_cost::DUPN, 11, 12),
        op(DUP12, Frontier, VM::op_dup::<11>, gas_cost::DUPN, 12, 13),
        op(DUP13, Frontier, VM::op_dup::<12>, gas_cost::DUPN, 13, 14),
        op(DUP14, Frontier, VM::op_dup::<13>, gas_cost::DUPN, 14, 15),
        op(DUP15, Frontier, VM::op_dup::<14>, gas_cost::DUPN, 15, 16),
        op(DUP16, Frontier, VM::op_dup::<15>, gas_cost::DUPN, 16, 17),
        op(SWAP1, Frontier, VM::op_swap::<1>, gas_cost::SWAPN, 2, 2),
        op(SWAP2, Frontier, VM::op_swap::<2>, gas_cost::SWAPN, 3, 3),
        op(SWAP3, Frontier, VM::op_swap::<3>, gas_cost::SWAPN, 4, 4),
        op(SWAP4, Frontier, VM::op_swap::<4>, gas_cost::SWAPN, 5, 5),
        op(SWAP5, Frontier, VM::op_swap::<5>, gas_cost::SWAPN, 6, 6),
        op(SWAP6, Frontier, VM::op_swap::<6>, gas_cost::SWAPN, 7, 7),
        op(SWAP7, Frontier, VM::op_swap::<7>, gas_cost::SWAPN, 8, 8),
        op(SWAP8, Frontier, VM::op_swap::<8>, gas_cost::SWAPN, 9, 9),
        op(SWAP9, Frontier, VM::op_swap::<9>, gas_cost::SWAPN, 10, 10),
        op(SWAP10, Frontier, VM::op_swap::<10>, gas_cost::SWAPN, 11, 11),
        op(SWAP11, Frontier, VM::op_swap::<11>, gas_cost::SWAPN, 12, 12),
        op(SWAP12, Frontier, VM::op_swap::<12>, gas_cost::SWAPN, 13, 13),
        op(SWAP13, Frontier, VM::op_swap::<13>, gas_cost::SWAPN, 14, 14),
        op(SWAP14, Frontier, VM::op_swap::<14>, gas_cost::SWAPN, 15, 15),
        op(SWAP15, Frontier, VM::op_swap::<15>, gas_cost::SWAPN, 16, 16),
        op(SWAP16, Frontier, VM::op_swap::<16>, gas_cost::SWAPN, 17, 17),
    ]);

    specs.extend([
        dyn_op(LOG0, Frontier, VM::op_log::<0>, gas_cost::LOG_STATIC, 2, 0, true),
        dyn_op(LOG1, Frontier, VM::op_log::<1>, gas_cost::LOG_STATIC, 3, 0, true),
        dyn_op(LOG2, Frontier, VM::op_log::<2>, gas_cost::LOG_STATIC, 4, 0, true),
        dyn_op(LOG3, Frontier, VM::op_log::<3>, gas_cost::LOG_STATIC, 5, 0, true),
        dyn_op(LOG4, Frontier, VM::op_log::<4>, gas_cost::LOG_STATIC, 6, 0, true),
    ]);

    specs
}
