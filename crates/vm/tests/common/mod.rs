//! Shared scaffolding for the end-to-end interpreter tests.

#![allow(dead_code, clippy::unwrap_used)]

use bytes::Bytes;
use kestrel_common::{Address, U256, types::Fork};
use kestrel_evm::{
    db::InMemoryDatabase,
    environment::{EVMConfig, Environment},
    errors::{ExecutionReport, VmOutcome},
    host::Host,
    vm::{CallParams, VM},
};
use std::sync::Arc;

pub const DEFAULT_GAS: u64 = 100_000;

pub fn sender() -> Address {
    Address::from_low_u64_be(0x1000)
}

pub fn contract() -> Address {
    Address::from_low_u64_be(0x42424242)
}

pub fn one_ether() -> U256 {
    U256::from(10u64).pow(U256::from(18))
}

/// A host with a funded sender and the given code installed at
/// [`contract`].
pub fn host_with_code(code: &[u8]) -> Host {
    let mut db = InMemoryDatabase::new();
    db.add_account(sender(), one_ether(), 0, Bytes::new());
    db.add_account(contract(), U256::zero(), 1, Bytes::copy_from_slice(code));
    Host::new(Arc::new(db))
}

pub fn cancun_env() -> Environment {
    env_for_fork(Fork::Cancun)
}

pub fn env_for_fork(fork: Fork) -> Environment {
    Environment {
        origin: sender(),
        gas_limit: DEFAULT_GAS,
        block_number: 10_000,
        timestamp: 1_700_000_000,
        block_gas_limit: 30_000_000,
        chain_id: U256::one(),
        config: EVMConfig::new(fork),
        ..Default::default()
    }
}

pub fn call_params(input: &[u8], gas: u64) -> CallParams {
    CallParams::Call {
        from: sender(),
        to: contract(),
        value: U256::zero(),
        input: Bytes::copy_from_slice(input),
        gas,
        is_static: false,
    }
}

/// Run `code` at [`contract`] with the given calldata and gas; returns the
/// report and the VM (whose host holds the post-state).
pub fn run_code_with_env(env: Environment, code: &[u8], input: &[u8], gas: u64) -> (ExecutionReport, VM) {
    let host = host_with_code(code);
    let mut vm = VM::new(env, host, call_params(input, gas), None).unwrap();
    let VmOutcome::Done(report) = vm.execute().unwrap() else {
        unreachable!("execution paused without a tracer");
    };
    (report, vm)
}

pub fn run_code(code: &[u8], input: &[u8], gas: u64) -> (ExecutionReport, VM) {
    run_code_with_env(cancun_env(), code, input, gas)
}

/// Run the same bytecode through the reference PC-walk interpreter.
pub fn run_code_mini(code: &[u8], input: &[u8], gas: u64) -> (ExecutionReport, VM) {
    let host = host_with_code(code);
    let mut vm = VM::new(cancun_env(), host, call_params(input, gas), None).unwrap();
    vm.mode = kestrel_evm::vm::InterpreterMode::PcWalk;
    let VmOutcome::Done(report) = vm.execute().unwrap() else {
        unreachable!("execution paused without a tracer");
    };
    (report, vm)
}
