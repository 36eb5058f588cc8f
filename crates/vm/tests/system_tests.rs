//! Call/create plumbing, storage semantics, logs, self-destruct and
//! precompile dispatch, end to end.

#![allow(
    clippy::unwrap_used,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing
)]

mod common;

use bytes::Bytes;
use common::*;
use hex_literal::hex;
use kestrel_common::{Address, H256, U256, types::Fork};
use kestrel_evm::{
    db::InMemoryDatabase,
    errors::VmOutcome,
    host::Host,
    utils::{calculate_create_address, word_to_address},
    vm::{CallParams, VM},
};
use std::sync::Arc;

/// Init code that deploys a one-byte `STOP` runtime:
/// MSTORE8(0, 0); RETURN(0, 1).
const INIT_CODE: [u8; 10] = hex!("60006000536001 6000 f3");

#[test]
fn top_level_create_deploys_code() {
    let mut db = InMemoryDatabase::new();
    db.add_account(sender(), one_ether(), 0, Bytes::new());
    let host = Host::new(Arc::new(db));

    let params = CallParams::Create {
        from: sender(),
        value: U256::from(7),
        init: Bytes::copy_from_slice(&INIT_CODE),
        gas: DEFAULT_GAS,
    };
    let mut vm = VM::new(cancun_env(), host, params, None).unwrap();
    let VmOutcome::Done(report) = vm.execute().unwrap() else {
        unreachable!()
    };
    assert!(report.is_success());

    let result = vm.call_result(&report);
    let created = result.created_address.unwrap();
    assert_eq!(created, calculate_create_address(sender(), 0));

    // Runtime code is the single STOP byte, nonce starts at 1, value moved.
    let code = vm.host.account_code(created).unwrap();
    assert_eq!(&code.bytecode[..], &[0x00]);
    let state = vm.host.account_state(created).unwrap();
    assert_eq!(state.nonce, 1);
    assert_eq!(state.balance, U256::from(7));
    assert_eq!(vm.host.nonce(sender()).unwrap(), 1);
}

#[test]
fn create_opcode_pushes_child_address() {
    // Store INIT_CODE left-aligned in a word, then CREATE(0, 0, 10) and
    // return the pushed address.
    let mut word = [0u8; 32];
    word[..INIT_CODE.len()].copy_from_slice(&INIT_CODE);

    let mut code = Vec::new();
    code.push(0x7F);
    code.extend_from_slice(&word);
    code.extend_from_slice(&hex!("600052"));
    code.extend_from_slice(&hex!("600a 6000 6000 f0"));
    code.extend_from_slice(&hex!("600052 60206000 f3"));

    let (report, mut vm) = run_code(&code, &[], DEFAULT_GAS);
    assert!(report.is_success());

    let child = word_to_address(U256::from_big_endian(&report.output));
    // The deploying contract's nonce was 1 before the create.
    assert_eq!(child, calculate_create_address(contract(), 1));
    assert_eq!(&vm.host.account_code(child).unwrap().bytecode[..], &[0x00]);
    // CREATE bumps the deployer's nonce.
    assert_eq!(vm.host.nonce(contract()).unwrap(), 2);
}

#[test]
fn create_with_reverting_init_pushes_zero() {
    // Init code: PUSH1 0; PUSH1 0; REVERT → create fails, pushes 0.
    // Parent: MSTORE8 the 5-byte init, CREATE, return pushed word.
    let init = hex!("60006000fd");
    let mut word = [0u8; 32];
    word[..init.len()].copy_from_slice(&init);

    let mut code = Vec::new();
    code.push(0x7F);
    code.extend_from_slice(&word);
    code.extend_from_slice(&hex!("600052"));
    code.extend_from_slice(&hex!("6005 6000 6000 f0"));
    code.extend_from_slice(&hex!("600052 60206000 f3"));

    let (report, mut vm) = run_code(&code, &[], DEFAULT_GAS);
    assert!(report.is_success());
    assert_eq!(U256::from_big_endian(&report.output), U256::zero());
    // Nonce burn survives the failed deployment.
    assert_eq!(vm.host.nonce(contract()).unwrap(), 2);
}

#[test]
fn call_transfers_value_and_returns_success() {
    let recipient = Address::from_low_u64_be(0xBEEF);
    // PUSH ret/args zeroes, value 5, recipient, gas 0xFFFF; CALL; return flag.
    let mut code = Vec::new();
    code.extend_from_slice(&hex!("6000 6000 6000 6000 6005 73"));
    code.extend_from_slice(recipient.as_bytes());
    code.extend_from_slice(&hex!("61ffff f1"));
    code.extend_from_slice(&hex!("600052 60206000 f3"));

    let mut db = InMemoryDatabase::new();
    db.add_account(sender(), one_ether(), 0, Bytes::new());
    db.add_account(contract(), U256::from(100), 1, Bytes::copy_from_slice(&code));
    let host = Host::new(Arc::new(db));

    let mut vm = VM::new(cancun_env(), host, call_params(&[], DEFAULT_GAS), None).unwrap();
    let VmOutcome::Done(report) = vm.execute().unwrap() else {
        unreachable!()
    };
    assert!(report.is_success());
    assert_eq!(U256::from_big_endian(&report.output), U256::one());
    assert_eq!(vm.host.balance(recipient).unwrap(), U256::from(5));
    assert_eq!(vm.host.balance(contract()).unwrap(), U256::from(95));
}

#[test]
fn call_with_insufficient_balance_pushes_zero() {
    let recipient = Address::from_low_u64_be(0xBEEF);
    let mut code = Vec::new();
    code.extend_from_slice(&hex!("6000 6000 6000 6000 61ffff 73"));
    code.extend_from_slice(recipient.as_bytes());
    code.extend_from_slice(&hex!("61ffff f1"));
    code.extend_from_slice(&hex!("600052 60206000 f3"));

    // The calling contract has no balance at all.
    let (report, mut vm) = run_code(&code, &[], DEFAULT_GAS);
    assert!(report.is_success());
    assert_eq!(U256::from_big_endian(&report.output), U256::zero());
    assert_eq!(vm.host.balance(recipient).unwrap(), U256::zero());
}

#[test]
fn staticcall_write_protection() {
    let callee = Address::from_low_u64_be(0xB0B);
    // Callee stores to slot 0.
    let callee_code = hex!("600160005500");

    // Caller STATICCALLs the callee and returns the success flag.
    let mut code = Vec::new();
    code.extend_from_slice(&hex!("6000 6000 6000 6000 73"));
    code.extend_from_slice(callee.as_bytes());
    code.extend_from_slice(&hex!("61ffff fa"));
    code.extend_from_slice(&hex!("600052 60206000 f3"));

    let mut db = InMemoryDatabase::new();
    db.add_account(sender(), one_ether(), 0, Bytes::new());
    db.add_account(contract(), U256::zero(), 1, Bytes::copy_from_slice(&code));
    db.add_account(callee, U256::zero(), 1, Bytes::copy_from_slice(&callee_code));
    let host = Host::new(Arc::new(db));

    let mut vm = VM::new(cancun_env(), host, call_params(&[], DEFAULT_GAS), None).unwrap();
    let VmOutcome::Done(report) = vm.execute().unwrap() else {
        unreachable!()
    };

    // The caller itself succeeds; the child failed with WriteProtection.
    assert!(report.is_success());
    assert_eq!(U256::from_big_endian(&report.output), U256::zero());
    assert_eq!(
        vm.host.storage_value(callee, H256::zero()).unwrap(),
        U256::zero()
    );
}

#[test]
fn delegatecall_preserves_caller_and_value() {
    let library = Address::from_low_u64_be(0x11B);
    // Library returns CALLER: CALLER; MSTORE 0; RETURN 32 bytes.
    let library_code = hex!("33 600052 60206000 f3");

    // Proxy delegatecalls the library with a 32-byte return window at 0,
    // drops the flag and returns the window.
    let mut code = Vec::new();
    code.extend_from_slice(&hex!("6020 6000 6000 6000 73"));
    code.extend_from_slice(library.as_bytes());
    code.extend_from_slice(&hex!("61ffff f4 50"));
    code.extend_from_slice(&hex!("60206000 f3"));

    let mut db = InMemoryDatabase::new();
    db.add_account(sender(), one_ether(), 0, Bytes::new());
    db.add_account(contract(), U256::zero(), 1, Bytes::copy_from_slice(&code));
    db.add_account(library, U256::zero(), 1, Bytes::copy_from_slice(&library_code));
    let host = Host::new(Arc::new(db));

    let mut vm = VM::new(cancun_env(), host, call_params(&[], DEFAULT_GAS), None).unwrap();
    let VmOutcome::Done(report) = vm.execute().unwrap() else {
        unreachable!()
    };
    assert!(report.is_success());
    // The library observed the proxy's caller, not the proxy itself.
    assert_eq!(
        word_to_address(U256::from_big_endian(&report.output)),
        sender()
    );
}

#[test]
fn transient_storage_roundtrip() {
    // TSTORE(0, 0x42); TLOAD(0); return it.
    let (report, _) = run_code(
        &hex!("6042 6000 5d 6000 5c 600052 60206000 f3"),
        &[],
        DEFAULT_GAS,
    );
    assert!(report.is_success());
    assert_eq!(U256::from_big_endian(&report.output), U256::from(0x42));
}

#[test]
fn log_is_collected_on_success() {
    // MSTORE a word, LOG1 with topic 0x77 over 32 bytes.
    let (report, _) = run_code(
        &hex!("60aa 600052 6077 6020 6000 a1 00"),
        &[],
        DEFAULT_GAS,
    );
    assert!(report.is_success());
    assert_eq!(report.logs.len(), 1);
    let log = &report.logs[0];
    assert_eq!(log.address, contract());
    assert_eq!(log.topics, vec![H256::from_low_u64_be(0x77)]);
    assert_eq!(U256::from_big_endian(&log.data), U256::from(0xAA));
}

#[test]
fn selfdestruct_on_cancun_keeps_pre_existing_contract() {
    let beneficiary = Address::from_low_u64_be(0xFEE);
    let mut code = Vec::new();
    code.push(0x73);
    code.extend_from_slice(beneficiary.as_bytes());
    code.push(0xFF);

    let mut db = InMemoryDatabase::new();
    db.add_account(sender(), one_ether(), 0, Bytes::new());
    db.add_account(contract(), U256::from(100), 1, Bytes::copy_from_slice(&code));
    let host = Host::new(Arc::new(db));

    let mut vm = VM::new(cancun_env(), host, call_params(&[], DEFAULT_GAS), None).unwrap();
    let VmOutcome::Done(report) = vm.execute().unwrap() else {
        unreachable!()
    };
    assert!(report.is_success());

    // EIP-6780: balance moves but the pre-existing account survives.
    assert_eq!(vm.host.balance(beneficiary).unwrap(), U256::from(100));
    assert_eq!(vm.host.balance(contract()).unwrap(), U256::zero());
    assert!(!vm.host.account_code(contract()).unwrap().is_empty());
}

#[test]
fn selfdestruct_pre_cancun_deletes_account() {
    let beneficiary = Address::from_low_u64_be(0xFEE);
    let mut code = Vec::new();
    code.push(0x73);
    code.extend_from_slice(beneficiary.as_bytes());
    code.push(0xFF);

    let mut db = InMemoryDatabase::new();
    db.add_account(sender(), one_ether(), 0, Bytes::new());
    db.add_account(contract(), U256::from(100), 1, Bytes::copy_from_slice(&code));
    let host = Host::new(Arc::new(db));

    let mut vm = VM::new(
        env_for_fork(Fork::Shanghai),
        host,
        call_params(&[], DEFAULT_GAS),
        None,
    )
    .unwrap();
    let VmOutcome::Done(report) = vm.execute().unwrap() else {
        unreachable!()
    };
    assert!(report.is_success());

    assert_eq!(vm.host.balance(beneficiary).unwrap(), U256::from(100));
    // The account itself is gone after finalisation.
    let state = vm.host.account_state(contract()).unwrap();
    assert!(state.is_empty());
}

#[test]
fn call_to_identity_precompile() {
    let input = hex!("0102030405");
    let (report, _) = run_code_to_address(Address::from_low_u64_be(4), &input, DEFAULT_GAS);
    assert!(report.is_success());
    assert_eq!(&report.output[..], &input);
    // 15 static + 3 for the single word.
    assert_eq!(report.gas_used, 18);
}

#[test]
fn call_to_sha256_precompile_via_call_opcode() {
    // CALL 0x02 with empty input, then RETURNDATACOPY the 32-byte digest
    // out and return it.
    let mut code = Vec::new();
    code.extend_from_slice(&hex!("6020 6000 6000 6000 6000 6002 61ffff f1 50"));
    code.extend_from_slice(&hex!("6020 6000 6000 3e"));
    code.extend_from_slice(&hex!("60206000 f3"));

    let (report, _) = run_code(&code, &[], DEFAULT_GAS);
    assert!(report.is_success());
    assert_eq!(
        hex::encode(&report.output),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn sstore_refund_is_capped_and_applied() {
    // Clear a pre-set slot: refund 4800 capped at gas_used / 5.
    let code = hex!("6000 6000 55 00");
    let mut db = InMemoryDatabase::new();
    db.add_account(sender(), one_ether(), 0, Bytes::new());
    db.add_account(contract(), U256::zero(), 1, Bytes::copy_from_slice(&code));
    db.set_storage(contract(), H256::zero(), U256::one());
    let host = Host::new(Arc::new(db));

    let mut vm = VM::new(cancun_env(), host, call_params(&[], DEFAULT_GAS), None).unwrap();
    let VmOutcome::Done(report) = vm.execute().unwrap() else {
        unreachable!()
    };
    assert!(report.is_success());

    // 6 for the pushes, 2100 cold + 2900 reset for the store.
    let unrefunded = 6 + 2100 + 2900;
    let refund = (unrefunded / 5).min(4800);
    assert_eq!(report.gas_refunded, refund);
    assert_eq!(report.gas_used, unrefunded - refund);
    assert_eq!(
        vm.host.storage_value(contract(), H256::zero()).unwrap(),
        U256::zero()
    );
}

/// Helper: top-level call straight to `address`.
fn run_code_to_address(
    address: Address,
    input: &[u8],
    gas: u64,
) -> (kestrel_evm::errors::ExecutionReport, VM) {
    let mut db = InMemoryDatabase::new();
    db.add_account(sender(), one_ether(), 0, Bytes::new());
    let host = Host::new(Arc::new(db));
    let params = CallParams::Call {
        from: sender(),
        to: address,
        value: U256::zero(),
        input: Bytes::copy_from_slice(input),
        gas,
        is_static: false,
    };
    let mut vm = VM::new(cancun_env(), host, params, None).unwrap();
    let VmOutcome::Done(report) = vm.execute().unwrap() else {
        unreachable!()
    };
    (report, vm)
}
