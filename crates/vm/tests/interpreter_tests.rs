//! End-to-end interpreter scenarios: arithmetic, control flow, memory,
//! revert semantics and static protection.

#![allow(
    clippy::unwrap_used,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing
)]

mod common;

use common::*;
use bytes::Bytes;
use hex_literal::hex;
use kestrel_common::U256;
use kestrel_evm::errors::{ExceptionalHalt, TxResult, VMError};

#[test]
fn simple_arithmetic() {
    // PUSH1 5; PUSH1 3; ADD; STOP
    let (report, vm) = run_code(&hex!("6005600301 00"), &[], DEFAULT_GAS);
    assert!(report.is_success());
    assert!(report.output.is_empty());
    assert_eq!(report.gas_used, 9);
    // A settled depth-0 commit leaves the journal empty.
    assert_eq!(vm.host.journal_len(), 0);
}

#[test]
fn arithmetic_result_returned() {
    // PUSH1 5; PUSH1 3; ADD; MSTORE at 0; RETURN 32 bytes.
    let (report, _) = run_code(&hex!("60056003016000526020 6000 f3"), &[], DEFAULT_GAS);
    assert!(report.is_success());
    assert_eq!(
        U256::from_big_endian(&report.output),
        U256::from(8),
        "5 + 3 must leave 8 on top of the stack at halt"
    );
}

#[test]
fn conditional_jump_not_taken() {
    // PUSH1 0; PUSH1 6; JUMPI; PUSH1 0x33; STOP; JUMPDEST; PUSH1 0x42; STOP
    // Zero condition: fall through and end with 0x33.
    let code = hex!("6000600657603300 5b 604200");
    let (report, _) = run_code(
        // Return the fall-through value to make it observable.
        &hex!("6000600f576033600052602060 00 f3 5b 604260005260206000f3"),
        &[],
        DEFAULT_GAS,
    );
    assert!(report.is_success());
    assert_eq!(U256::from_big_endian(&report.output), U256::from(0x33));

    // The plain variant also succeeds and returns nothing.
    let (report, _) = run_code(&code, &[], DEFAULT_GAS);
    assert!(report.is_success());
    assert!(report.output.is_empty());
}

#[test]
fn conditional_jump_taken() {
    // PUSH1 1; PUSH1 15; JUMPI; PUSH1 0x33 ...; JUMPDEST at 15; PUSH1 0x42; RETURN
    let (report, _) = run_code(
        &hex!("6001600f576033600052602060 00 f3 5b 604260005260206000f3"),
        &[],
        DEFAULT_GAS,
    );
    assert!(report.is_success());
    assert_eq!(U256::from_big_endian(&report.output), U256::from(0x42));
}

#[test]
fn invalid_jump_consumes_all_gas() {
    // PUSH1 4; JUMP; INVALID; STOP — destination 4 is not a JUMPDEST.
    let (report, _) = run_code(&hex!("600456fe00"), &[], DEFAULT_GAS);
    assert!(!report.is_success());
    assert_eq!(
        report.result,
        TxResult::Revert(VMError::ExceptionalHalt(ExceptionalHalt::InvalidJump))
    );
    assert_eq!(report.gas_used, DEFAULT_GAS);
    assert!(report.output.is_empty());
}

#[test]
fn jump_into_push_immediate_is_invalid() {
    // PUSH1 3; JUMP; PUSH2 0x5B5B — the 0x5B bytes are immediates.
    let (report, _) = run_code(&hex!("600356615b5b"), &[], DEFAULT_GAS);
    assert_eq!(
        report.result,
        TxResult::Revert(VMError::ExceptionalHalt(ExceptionalHalt::InvalidJump))
    );
}

#[test]
fn memory_roundtrip() {
    // PUSH32 <pattern>; PUSH1 0; MSTORE; PUSH1 0; MLOAD;
    // PUSH1 0; MSTORE; RETURN memory[0..32].
    let mut code = Vec::new();
    code.push(0x7F);
    let pattern = hex!("deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef");
    code.extend_from_slice(&pattern);
    code.extend_from_slice(&hex!("600052 600051 600052 60206000f3"));

    let (report, _) = run_code(&code, &[], DEFAULT_GAS);
    assert!(report.is_success());
    assert_eq!(report.output, Bytes::copy_from_slice(&pattern));
    // PUSH32 + 5×PUSH1 + MSTORE + MLOAD + MSTORE + RETURN constants plus a
    // single one-word expansion.
    assert_eq!(report.gas_used, 3 * 6 + 3 + 3 + 3 + 3);
}

#[test]
fn keccak256_of_empty_slice() {
    // PUSH1 0; PUSH1 0; KECCAK256; MSTORE at 0; RETURN 32 bytes.
    let (report, _) = run_code(&hex!("6000600020600052602060 00 f3"), &[], DEFAULT_GAS);
    assert!(report.is_success());
    assert_eq!(
        hex::encode(&report.output),
        "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
    );
}

#[test]
fn keccak_gas_is_base_plus_block_overhead() {
    // PUSH1 0; PUSH1 0; KECCAK256; STOP
    let (report, _) = run_code(&hex!("600060002000"), &[], DEFAULT_GAS);
    assert!(report.is_success());
    assert_eq!(report.gas_used, 3 + 3 + 30);
}

#[test]
fn revert_returns_data_and_refunds_gas() {
    // SSTORE slot 0 := 1, then REVERT with a stored word.
    // PUSH1 1; PUSH1 0; SSTORE; PUSH1 0xEE; PUSH1 0; MSTORE; REVERT(0,32)
    let (report, mut vm) = run_code(
        &hex!("6001600055 60ee600052 60206000fd"),
        &[],
        DEFAULT_GAS,
    );
    assert!(!report.is_success());
    assert_eq!(report.result, TxResult::Revert(VMError::RevertOpcode));
    assert_eq!(U256::from_big_endian(&report.output), U256::from(0xEE));
    // Unused gas is refunded to the caller: far less than the limit burned.
    assert!(report.gas_used < DEFAULT_GAS);
    // And the storage write was rolled back.
    let value = vm
        .host
        .storage_value(contract(), kestrel_common::H256::zero())
        .unwrap();
    assert_eq!(value, U256::zero());
    assert!(report.logs.is_empty());
}

#[test]
fn stack_underflow_is_exceptional() {
    // ADD on an empty stack.
    let (report, _) = run_code(&hex!("01"), &[], DEFAULT_GAS);
    assert_eq!(
        report.result,
        TxResult::Revert(VMError::ExceptionalHalt(ExceptionalHalt::StackUnderflow))
    );
    assert_eq!(report.gas_used, DEFAULT_GAS);
}

#[test]
fn undefined_opcode_is_exceptional() {
    let (report, _) = run_code(&hex!("600160020c"), &[], DEFAULT_GAS);
    assert_eq!(
        report.result,
        TxResult::Revert(VMError::ExceptionalHalt(ExceptionalHalt::InvalidOpcode))
    );
    assert_eq!(report.gas_used, DEFAULT_GAS);
}

#[test]
fn invalid_opcode_consumes_all_gas() {
    let (report, _) = run_code(&hex!("fe"), &[], DEFAULT_GAS);
    assert_eq!(
        report.result,
        TxResult::Revert(VMError::ExceptionalHalt(ExceptionalHalt::InvalidOpcode))
    );
    assert_eq!(report.gas_used, DEFAULT_GAS);
}

#[test]
fn out_of_gas_in_block_accounting() {
    // PUSH1 5; PUSH1 3; ADD; STOP needs 9 gas.
    let (report, _) = run_code(&hex!("600560030100"), &[], 8);
    assert_eq!(
        report.result,
        TxResult::Revert(VMError::ExceptionalHalt(ExceptionalHalt::OutOfGas))
    );
    assert_eq!(report.gas_used, 8);
}

#[test]
fn calldata_is_visible() {
    // CALLDATALOAD at 0, return it.
    let (report, _) = run_code(
        &hex!("600035600052602060 00 f3"),
        &hex!("00000000000000000000000000000000000000000000000000000000000000aa"),
        DEFAULT_GAS,
    );
    assert!(report.is_success());
    assert_eq!(U256::from_big_endian(&report.output), U256::from(0xAA));
}

#[test]
fn empty_code_halts_immediately() {
    let (report, _) = run_code(&[], &[], DEFAULT_GAS);
    assert!(report.is_success());
    assert_eq!(report.gas_used, 0);
    assert!(report.output.is_empty());
}

#[test]
fn gas_opcode_observes_sequential_gas() {
    // GAS; MSTORE at 0; RETURN — the pushed value must reflect only the
    // gas spent up to and including GAS itself.
    let (report, _) = run_code(&hex!("5a600052602060 00 f3"), &[], DEFAULT_GAS);
    assert!(report.is_success());
    let observed = U256::from_big_endian(&report.output);
    // GAS costs 2; everything after must not have been deducted yet.
    assert_eq!(observed, U256::from(DEFAULT_GAS - 2));
}

#[test]
fn msize_tracks_word_aligned_memory() {
    // MSTORE8 at 33 touches two words; MSIZE must read 64.
    let (report, _) = run_code(&hex!("6001602153 59 600052602060 00 f3"), &[], DEFAULT_GAS);
    assert!(report.is_success());
    assert_eq!(U256::from_big_endian(&report.output), U256::from(64));
}

#[test]
fn gas_remaining_is_monotonic_within_a_frame() {
    use kestrel_evm::tracer::{CollectingTracer, Tracer};
    use std::{cell::RefCell, rc::Rc};

    let tracer: Rc<RefCell<CollectingTracer>> = Rc::new(RefCell::new(CollectingTracer::default()));
    let tracer_dyn: Rc<RefCell<dyn Tracer>> = tracer.clone();

    let host = host_with_code(&hex!("6005600301600052602060 00 f3"));
    let mut vm = kestrel_evm::vm::VM::new(
        cancun_env(),
        host,
        call_params(&[], DEFAULT_GAS),
        Some(tracer_dyn),
    )
    .unwrap();
    let outcome = vm.execute().unwrap();
    assert!(matches!(outcome, kestrel_evm::errors::VmOutcome::Done(_)));

    let steps = &tracer.borrow().steps;
    assert!(!steps.is_empty());
    for window in steps.windows(2) {
        assert!(
            window[1].gas_remaining <= window[0].gas_remaining,
            "gas must never increase within a frame"
        );
    }
}
