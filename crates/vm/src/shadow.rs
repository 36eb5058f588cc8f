//! Differential shadow execution.
//!
//! The reference interpreter walks raw bytecode by program counter with the
//! same handlers the main interpreter uses; disagreement between the two
//! means one of them is wrong. `PerCall` replays the whole execution on a
//! fork of the pre-execution state and compares the observable results;
//! `PerBlock` additionally records a summary at every basic-block entry on
//! both sides and diffs the sequences, which pins a divergence to the block
//! where it starts.
//!
//! Mismatches are collected, logged, and (with `shadow_fail_fast`) turned
//! into debug assertions. Release builds keep the main interpreter's
//! result.

use crate::{
    environment::Environment,
    errors::{ExecutionReport, VmOutcome},
    host::Host,
    vm::{CallParams, InterpreterMode, VM},
};
use kestrel_common::U256;

/// How much differential validation runs alongside normal execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowMode {
    #[default]
    Off,
    /// Replay each completed top-level call and compare
    /// `(success, return_data, gas_used)`.
    PerCall,
    /// `PerCall` plus a comparison at every basic-block entry.
    PerBlock,
}

/// Stack items captured per block summary.
pub const SHADOW_STACK_ITEMS: usize = 8;

/// State fingerprint at a basic-block entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub pc: usize,
    pub gas_remaining: i64,
    pub stack_top: Vec<U256>,
    pub memory_size: usize,
}

/// One observed divergence between the interpreters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub pc: usize,
    pub field: &'static str,
    pub main: String,
    pub mini: String,
}

/// Everything needed to replay an execution from scratch: a fork of the
/// pre-execution host state plus the call parameters.
pub struct ShadowContext {
    host: Host,
    env: Environment,
    params: CallParams,
    mode: ShadowMode,
}

impl ShadowContext {
    /// Capture before the main execution mutates anything.
    pub fn capture(host: &Host, env: &Environment, params: &CallParams) -> Self {
        let mode = env.config.shadow;
        let mut env = env.clone();
        // The replay must not shadow itself.
        env.config.shadow = ShadowMode::Off;
        Self {
            host: host.clone(),
            env,
            params: params.clone(),
            mode,
        }
    }

    /// Replay with the reference interpreter and diff against the main run.
    pub fn run_and_compare(
        self,
        main_report: &ExecutionReport,
        main_trace: &[BlockSummary],
        fail_fast: bool,
    ) -> Vec<Mismatch> {
        let mode = self.mode;
        let mut mismatches = Vec::new();

        let mut shadow_vm = match VM::new(self.env, self.host, self.params, None) {
            Ok(vm) => vm,
            Err(error) => {
                mismatches.push(Mismatch {
                    pc: 0,
                    field: "shadow-setup",
                    main: "ok".to_string(),
                    mini: format!("{error}"),
                });
                return mismatches;
            }
        };
        shadow_vm.mode = InterpreterMode::PcWalk;
        shadow_vm.record_block_trace = mode == ShadowMode::PerBlock;

        let mini_report = match shadow_vm.execute() {
            Ok(VmOutcome::Done(report)) => report,
            Ok(VmOutcome::Paused) => {
                mismatches.push(Mismatch {
                    pc: 0,
                    field: "shadow-run",
                    main: "completed".to_string(),
                    mini: "paused".to_string(),
                });
                return mismatches;
            }
            Err(error) => {
                mismatches.push(Mismatch {
                    pc: 0,
                    field: "shadow-run",
                    main: "completed".to_string(),
                    mini: format!("{error}"),
                });
                return mismatches;
            }
        };

        if mini_report.is_success() != main_report.is_success() {
            mismatches.push(Mismatch {
                pc: 0,
                field: "success",
                main: format!("{}", main_report.is_success()),
                mini: format!("{}", mini_report.is_success()),
            });
        }
        if mini_report.output != main_report.output {
            mismatches.push(Mismatch {
                pc: 0,
                field: "return_data",
                main: hex_prefix(&main_report.output),
                mini: hex_prefix(&mini_report.output),
            });
        }
        if mini_report.gas_used != main_report.gas_used {
            mismatches.push(Mismatch {
                pc: 0,
                field: "gas_used",
                main: main_report.gas_used.to_string(),
                mini: mini_report.gas_used.to_string(),
            });
        }

        if mode == ShadowMode::PerBlock {
            compare_traces(main_trace, &shadow_vm.block_trace, &mut mismatches);
        }

        for mismatch in &mismatches {
            tracing::warn!(
                pc = mismatch.pc,
                field = mismatch.field,
                main = %mismatch.main,
                mini = %mismatch.mini,
                "shadow interpreter mismatch"
            );
            if fail_fast {
                debug_assert!(
                    false,
                    "shadow mismatch at pc {}: {} (main {} / mini {})",
                    mismatch.pc, mismatch.field, mismatch.main, mismatch.mini
                );
            }
        }

        mismatches
    }
}

fn compare_traces(main: &[BlockSummary], mini: &[BlockSummary], mismatches: &mut Vec<Mismatch>) {
    if main.len() != mini.len() {
        mismatches.push(Mismatch {
            pc: 0,
            field: "block_count",
            main: main.len().to_string(),
            mini: mini.len().to_string(),
        });
    }

    for (main_block, mini_block) in main.iter().zip(mini.iter()) {
        if main_block.pc != mini_block.pc {
            mismatches.push(Mismatch {
                pc: main_block.pc,
                field: "block_pc",
                main: main_block.pc.to_string(),
                mini: mini_block.pc.to_string(),
            });
            // Streams diverged; later pairs are meaningless.
            break;
        }
        if main_block.gas_remaining != mini_block.gas_remaining {
            mismatches.push(Mismatch {
                pc: main_block.pc,
                field: "gas_remaining",
                main: main_block.gas_remaining.to_string(),
                mini: mini_block.gas_remaining.to_string(),
            });
        }
        if main_block.stack_top != mini_block.stack_top {
            mismatches.push(Mismatch {
                pc: main_block.pc,
                field: "stack_top",
                main: format!("{:?}", main_block.stack_top),
                mini: format!("{:?}", mini_block.stack_top),
            });
        }
        if main_block.memory_size != mini_block.memory_size {
            mismatches.push(Mismatch {
                pc: main_block.pc,
                field: "memory_size",
                main: main_block.memory_size.to_string(),
                mini: mini_block.memory_size.to_string(),
            });
        }
    }
}

fn hex_prefix(data: &[u8]) -> String {
    const MAX: usize = 64;
    let shown = data.get(..data.len().min(MAX)).unwrap_or_default();
    let mut out = String::with_capacity(shown.len().saturating_mul(2).saturating_add(3));
    for byte in shown {
        out.push_str(&format!("{byte:02x}"));
    }
    if data.len() > MAX {
        out.push('…');
    }
    out
}
