//! Per-instruction execution observer.
//!
//! A tracer sees each instruction twice: `before` with the pre-state and
//! `after` with the outcome, plus one `finalize` call when the whole
//! execution settles. Implementations must not block and cannot mutate
//! interpreter state; their only lever is the control value returned from
//! `before`: `Pause` suspends execution at the instruction boundary (the
//! VM returns a `Paused` outcome and `resume` re-enters the loop), `Stop`
//! aborts the execution with everything rolled back.
//!
//! Snapshots in `after` respect the configured bounds; an over-size stack
//! or memory is reported as `None` rather than truncated.

use bytes::Bytes;
use kestrel_common::{Address, H256, U256};
use rustc_hash::FxHashSet;

use crate::errors::VMError;

/// Pre-execution view of one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInfo {
    pub pc: usize,
    pub opcode: u8,
    pub gas_remaining: u64,
    pub depth: usize,
    pub address: Address,
    pub caller: Address,
    pub is_static: bool,
    pub stack_size: usize,
    pub memory_size: usize,
}

/// Post-execution view of one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub gas_after: u64,
    pub gas_cost: u64,
    /// Top of stack after the step, newest first; `None` when the stack is
    /// larger than the configured bound.
    pub stack: Option<Vec<U256>>,
    /// Memory after the step; `None` when larger than the configured bound.
    pub memory: Option<Bytes>,
    /// Storage slots written during the step.
    pub storage_deltas: Vec<(Address, H256)>,
    pub logs_emitted: usize,
    pub error: Option<VMError>,
}

/// What the interpreter should do after `before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceControl {
    #[default]
    Continue,
    /// Cooperative single-step: suspend before executing this instruction.
    Pause,
    /// Abort the execution; all state changes roll back.
    Stop,
}

/// Snapshot bounds for `StepResult`.
#[derive(Debug, Clone, Copy)]
pub struct TracerConfig {
    pub memory_max_bytes: usize,
    pub stack_max_items: usize,
    pub log_data_max_bytes: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            memory_max_bytes: 4096,
            stack_max_items: 32,
            log_data_max_bytes: 4096,
        }
    }
}

pub trait Tracer {
    fn before(&mut self, _step: &StepInfo) -> TraceControl {
        TraceControl::Continue
    }

    fn after(&mut self, _result: &StepResult) {}

    fn finalize(&mut self, _return_value: &Bytes, _success: bool) {}
}

/// Pause whenever execution reaches one of the registered program
/// counters.
#[derive(Debug, Default)]
pub struct Breakpoints {
    pcs: FxHashSet<usize>,
}

impl Breakpoints {
    pub fn new(pcs: impl IntoIterator<Item = usize>) -> Self {
        Self {
            pcs: pcs.into_iter().collect(),
        }
    }

    pub fn add(&mut self, pc: usize) {
        self.pcs.insert(pc);
    }

    pub fn remove(&mut self, pc: usize) {
        self.pcs.remove(&pc);
    }
}

impl Tracer for Breakpoints {
    fn before(&mut self, step: &StepInfo) -> TraceControl {
        if self.pcs.contains(&step.pc) {
            TraceControl::Pause
        } else {
            TraceControl::Continue
        }
    }
}

/// Records every step; handy in tests and debugging sessions.
#[derive(Debug, Default)]
pub struct CollectingTracer {
    pub steps: Vec<StepInfo>,
    pub results: Vec<StepResult>,
    pub finalized: Option<(Bytes, bool)>,
}

impl Tracer for CollectingTracer {
    fn before(&mut self, step: &StepInfo) -> TraceControl {
        self.steps.push(step.clone());
        TraceControl::Continue
    }

    fn after(&mut self, result: &StepResult) {
        self.results.push(result.clone());
    }

    fn finalize(&mut self, return_value: &Bytes, success: bool) {
        self.finalized = Some((return_value.clone(), success));
    }
}
