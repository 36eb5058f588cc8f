//! Differential validation: the analysis interpreter and the reference PC
//! walk must agree on every observable result, and the shadow comparator
//! must find nothing to complain about.

#![allow(
    clippy::unwrap_used,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing
)]

mod common;

use common::*;
use hex_literal::hex;
use kestrel_common::U256;
use kestrel_evm::{
    errors::VmOutcome,
    shadow::ShadowMode,
    tracer::{Breakpoints, CollectingTracer, TraceControl, Tracer},
    vm::VM,
};
use std::{cell::RefCell, rc::Rc};

/// A corpus of bytecodes exercising every handler family. Each entry runs
/// through both interpreters with identical inputs.
fn corpus() -> Vec<Vec<u8>> {
    let mut cases: Vec<Vec<u8>> = vec![
        // The §8 differential case: ADD then RETURN 32 bytes.
        hex!("6001600201600052602060 00 f3").to_vec(),
        // Arithmetic and comparison mix.
        hex!("600560030160020260016010 0b 1016 00").to_vec(),
        // Signed ops on negative values.
        hex!("6000 6001 03 6002 05 600052602060 00 f3").to_vec(),
        // EXP with a two-byte exponent.
        hex!("61010060020a600052602060 00 f3").to_vec(),
        // A loop: count down from 3.
        hex!("6003 5b 6001 90 03 80 6002 57 00").to_vec(),
        // Memory: MSTORE/MLOAD/MSTORE8/MSIZE/MCOPY.
        hex!("60aa600052 60bb602152 6010 6000 6040 5e 59 600052602060 00 f3").to_vec(),
        // KECCAK over 64 bytes.
        hex!("60406000 20 600052602060 00 f3").to_vec(),
        // Storage: double store, load, clear.
        hex!("6001600055 6002600055 600054 600052 6000600055 602060 00 f3").to_vec(),
        // Transient storage.
        hex!("6099 6005 5d 6005 5c 600052602060 00 f3").to_vec(),
        // DUP/SWAP shuffling.
        hex!("600160026003 81 91 50 5050 00").to_vec(),
        // CALLDATA handling.
        hex!("600035 602035 01 600052 366000526020 6000 f3").to_vec(),
        // CODECOPY of the whole code.
        hex!("38 6000 6000 39 6000 51 600052602060 00 f3").to_vec(),
        // GAS mid-stream feeding arithmetic.
        hex!("5a 5a 03 600052602060 00 f3").to_vec(),
        // PC in several spots.
        hex!("58 58 01 58 01 600052602060 00 f3").to_vec(),
        // LOG2 with data.
        hex!("60cc600052 6001 6002 60206000 a2 00").to_vec(),
        // REVERT with data.
        hex!("60ee600052 60206000 fd").to_vec(),
        // Invalid jump.
        hex!("600456 fe 00").to_vec(),
        // Plain INVALID.
        hex!("6001 fe").to_vec(),
        // Undefined opcode mid-stream.
        hex!("6001 0c 00").to_vec(),
        // Stack underflow.
        hex!("50").to_vec(),
        // Truncated PUSH at the end of code.
        hex!("63abcd").to_vec(),
        // Out-of-range RETURNDATACOPY.
        hex!("6001 6000 6000 3e 00").to_vec(),
        // BALANCE + EXTCODESIZE + EXTCODEHASH of self and a stranger.
        hex!("3031 3b 3f 00").to_vec(),
        // SELFDESTRUCT to a fresh beneficiary.
        hex!("61beef ff").to_vec(),
    ];

    // CALL to the identity precompile with a return window.
    cases.push(hex!("6020 6000 6000 6000 6000 6004 61ffff f1 00").to_vec());
    // CREATE with trivially returning init code.
    let mut create = Vec::new();
    create.push(0x7F);
    let mut word = [0u8; 32];
    word[..10].copy_from_slice(&hex!("60006000536001 6000 f3"));
    create.extend_from_slice(&word);
    create.extend_from_slice(&hex!("600052 600a 6000 6000 f0 600052602060 00 f3"));
    cases.push(create);

    cases
}

#[test]
fn main_and_mini_interpreters_agree_on_the_corpus() {
    for (index, code) in corpus().iter().enumerate() {
        let input = hex!(
            "000000000000000000000000000000000000000000000000000000000000002a0000000000000000000000000000000000000000000000000000000000000007"
        );
        let (main_report, _) = run_code(code, &input, DEFAULT_GAS);
        let (mini_report, _) = run_code_mini(code, &input, DEFAULT_GAS);

        assert_eq!(
            main_report.is_success(),
            mini_report.is_success(),
            "case {index}: success diverged"
        );
        assert_eq!(
            main_report.output, mini_report.output,
            "case {index}: return data diverged"
        );
        assert_eq!(
            main_report.gas_used, mini_report.gas_used,
            "case {index}: gas diverged"
        );
        assert_eq!(
            main_report.gas_refunded, mini_report.gas_refunded,
            "case {index}: refunds diverged"
        );
        assert_eq!(
            main_report.logs, mini_report.logs,
            "case {index}: logs diverged"
        );
    }
}

#[test]
fn per_call_shadow_finds_no_mismatches() {
    for (index, code) in corpus().iter().enumerate() {
        let mut env = cancun_env();
        env.config.shadow = ShadowMode::PerCall;
        let (_, vm) = run_code_with_env(env, code, &[], DEFAULT_GAS);
        assert!(
            vm.shadow_mismatches.is_empty(),
            "case {index}: {:?}",
            vm.shadow_mismatches
        );
    }
}

#[test]
fn per_block_shadow_finds_no_mismatches() {
    for (index, code) in corpus().iter().enumerate() {
        let mut env = cancun_env();
        env.config.shadow = ShadowMode::PerBlock;
        let (_, vm) = run_code_with_env(env, code, &[], DEFAULT_GAS);
        assert!(
            vm.shadow_mismatches.is_empty(),
            "case {index}: {:?}",
            vm.shadow_mismatches
        );
    }
}

#[test]
fn interpreters_agree_across_forks() {
    use kestrel_common::types::Fork;

    // Fork-sensitive code: EXP pricing, SLOAD pricing, balance access.
    let code = hex!("61010060020a 50 600054 50 3031 00");
    for fork in [
        Fork::Frontier,
        Fork::Tangerine,
        Fork::SpuriousDragon,
        Fork::Byzantium,
        Fork::Istanbul,
        Fork::Berlin,
        Fork::London,
        Fork::Paris,
        Fork::Shanghai,
        Fork::Cancun,
    ] {
        let (main_report, _) = run_code_with_env(env_for_fork(fork), &code, &[], DEFAULT_GAS);

        let host = host_with_code(&code);
        let mut vm = VM::new(env_for_fork(fork), host, call_params(&[], DEFAULT_GAS), None).unwrap();
        vm.mode = kestrel_evm::vm::InterpreterMode::PcWalk;
        let VmOutcome::Done(mini_report) = vm.execute().unwrap() else {
            unreachable!()
        };

        assert_eq!(main_report.gas_used, mini_report.gas_used, "{fork:?}");
        assert_eq!(main_report.is_success(), mini_report.is_success(), "{fork:?}");
    }
}

#[test]
fn tracer_sees_every_instruction() {
    let tracer = Rc::new(RefCell::new(CollectingTracer::default()));
    let tracer_dyn: Rc<RefCell<dyn Tracer>> = tracer.clone();

    // PUSH1 5; PUSH1 3; ADD; STOP → four observable instructions.
    let host = host_with_code(&hex!("600560030100"));
    let mut vm = VM::new(cancun_env(), host, call_params(&[], DEFAULT_GAS), Some(tracer_dyn)).unwrap();
    let VmOutcome::Done(report) = vm.execute().unwrap() else {
        unreachable!()
    };
    assert!(report.is_success());

    let collected = tracer.borrow();
    assert_eq!(collected.steps.len(), 4);
    assert_eq!(collected.steps[0].opcode, 0x60);
    assert_eq!(collected.steps[2].opcode, 0x01);
    assert_eq!(collected.steps[3].opcode, 0x00);
    assert_eq!(collected.results.len(), 4);
    // After ADD the bounded stack snapshot shows the sum.
    assert_eq!(collected.results[2].stack.as_deref(), Some(&[U256::from(8)][..]));
    assert_eq!(collected.finalized, Some((bytes::Bytes::new(), true)));
}

#[test]
fn breakpoint_pauses_and_resume_completes() {
    // Break at the ADD (pc 4).
    let breakpoints = Rc::new(RefCell::new(Breakpoints::new([4usize])));
    let tracer_dyn: Rc<RefCell<dyn Tracer>> = breakpoints;

    let host = host_with_code(&hex!("6005600301600052602060 00 f3"));
    let mut vm = VM::new(cancun_env(), host, call_params(&[], DEFAULT_GAS), Some(tracer_dyn)).unwrap();

    let outcome = vm.execute().unwrap();
    assert_eq!(outcome, VmOutcome::Paused);

    // Resumption re-enters the loop with the frame chain intact.
    let VmOutcome::Done(report) = vm.resume().unwrap() else {
        unreachable!("second pause at the same breakpoint")
    };
    assert!(report.is_success());
    assert_eq!(U256::from_big_endian(&report.output), U256::from(8));
}

#[test]
fn stop_control_aborts_with_rollback() {
    struct StopAtSstore;
    impl Tracer for StopAtSstore {
        fn before(&mut self, step: &kestrel_evm::tracer::StepInfo) -> TraceControl {
            if step.opcode == 0x55 {
                TraceControl::Stop
            } else {
                TraceControl::Continue
            }
        }
    }

    let tracer: Rc<RefCell<dyn Tracer>> = Rc::new(RefCell::new(StopAtSstore));
    let host = host_with_code(&hex!("6001600055 00"));
    let mut vm = VM::new(cancun_env(), host, call_params(&[], DEFAULT_GAS), Some(tracer)).unwrap();
    let VmOutcome::Done(report) = vm.execute().unwrap() else {
        unreachable!()
    };
    assert!(!report.is_success());
    assert_eq!(
        vm.host
            .storage_value(contract(), kestrel_common::H256::zero())
            .unwrap(),
        U256::zero()
    );
}
