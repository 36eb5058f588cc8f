use crate::{
    call_frame::{CallFrame, Stack},
    environment::Environment,
    errors::{
        CallResult, ContextResult, ExecutionReport, InternalError, PrecompileError, TxResult,
        VMError, VmOutcome,
    },
    gas_schedule::GasSchedule,
    host::Host,
    memory::Memory,
    precompiles,
    shadow::{BlockSummary, Mismatch, ShadowContext, ShadowMode},
    tracer::{StepInfo, StepResult, TraceControl, Tracer, TracerConfig},
    utils::{calculate_create2_address, calculate_create_address},
};
use bytes::Bytes;
use kestrel_common::{Address, H256, U256, types::{Code, Fork}};
use std::{cell::RefCell, rc::Rc};

/// Entry parameters for one execution: a message call or a contract
/// creation.
#[derive(Debug, Clone)]
pub enum CallParams {
    Call {
        from: Address,
        to: Address,
        value: U256,
        input: Bytes,
        gas: u64,
        is_static: bool,
    },
    Create {
        from: Address,
        value: U256,
        init: Bytes,
        gas: u64,
    },
    Create2 {
        from: Address,
        value: U256,
        init: Bytes,
        salt: U256,
        gas: u64,
    },
}

impl CallParams {
    pub fn gas(&self) -> u64 {
        match self {
            CallParams::Call { gas, .. }
            | CallParams::Create { gas, .. }
            | CallParams::Create2 { gas, .. } => *gas,
        }
    }
}

/// Which loop executes frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpreterMode {
    /// Pre-analysed instruction stream with block-level validation.
    #[default]
    Analysis,
    /// The reference PC walk over raw bytecode.
    PcWalk,
}

/// Result of running the interpreter loop until the top frame settles or a
/// tracer suspends execution.
pub(crate) enum LoopOutcome {
    Done(ContextResult),
    Paused,
}

/// The execution engine: one call tree at a time, driven by either the
/// analysis loop or the reference PC walk over the same handlers.
pub struct VM {
    /// Parent frames of the currently executing one.
    pub call_frames: Vec<CallFrame>,
    pub current_call_frame: CallFrame,
    pub env: Environment,
    pub host: Host,
    pub tracer: Option<Rc<RefCell<dyn Tracer>>>,
    pub tracer_config: TracerConfig,
    /// Reusable operand stacks from completed child frames.
    pub stack_pool: Vec<Stack>,
    pub mode: InterpreterMode,
    /// Populated after execution when shadow comparison ran.
    pub shadow_mismatches: Vec<Mismatch>,
    pub(crate) record_block_trace: bool,
    pub(crate) block_trace: Vec<BlockSummary>,
    pub(crate) resume_skip_trace: bool,
    created_address: Option<Address>,
    shadow_context: Option<ShadowContext>,
    params: CallParams,
    started: bool,
}

impl VM {
    pub fn new(
        env: Environment,
        mut host: Host,
        params: CallParams,
        tracer: Option<Rc<RefCell<dyn Tracer>>>,
    ) -> Result<Self, VMError> {
        let fork = env.config.fork;

        // Capture the replay state before anything is mutated.
        let shadow_context = if env.config.shadow == ShadowMode::Off {
            None
        } else {
            Some(ShadowContext::capture(&host, &env, &params))
        };
        let record_block_trace = env.config.shadow == ShadowMode::PerBlock;

        let memory = Memory::with_limits(env.config.memory_limit, env.config.initial_memory_capacity);

        let (frame, created_address) = match &params {
            CallParams::Call {
                from,
                to,
                value,
                input,
                gas,
                is_static,
            } => {
                let code = host.account_code(*to)?;
                let analysis = host.analysis(&code, fork);
                let frame = CallFrame::new(
                    *from,
                    *to,
                    *to,
                    code,
                    analysis,
                    *value,
                    input.clone(),
                    *is_static,
                    *gas,
                    0,
                    true,
                    false,
                    0,
                    0,
                    Stack::default(),
                    memory,
                );
                (frame, None)
            }
            CallParams::Create {
                from,
                value,
                init,
                gas,
            } => {
                let nonce = host.nonce(*from)?;
                let address = calculate_create_address(*from, nonce);
                let code = Code::from_bytecode_unchecked(init.clone(), H256::zero());
                let analysis = host.analysis(&code, fork);
                let frame = CallFrame::new(
                    *from,
                    address,
                    address,
                    code,
                    analysis,
                    *value,
                    Bytes::new(),
                    false,
                    *gas,
                    0,
                    true,
                    true,
                    0,
                    0,
                    Stack::default(),
                    memory,
                );
                (frame, Some(address))
            }
            CallParams::Create2 {
                from,
                value,
                init,
                salt,
                gas,
            } => {
                let address = calculate_create2_address(*from, init, *salt);
                let code = Code::from_bytecode_unchecked(init.clone(), H256::zero());
                let analysis = host.analysis(&code, fork);
                let frame = CallFrame::new(
                    *from,
                    address,
                    address,
                    code,
                    analysis,
                    *value,
                    Bytes::new(),
                    false,
                    *gas,
                    0,
                    true,
                    true,
                    0,
                    0,
                    Stack::default(),
                    memory,
                );
                (frame, Some(address))
            }
        };

        Ok(Self {
            call_frames: Vec::new(),
            current_call_frame: frame,
            env,
            host,
            tracer,
            tracer_config: TracerConfig::default(),
            stack_pool: Vec::new(),
            mode: InterpreterMode::Analysis,
            shadow_mismatches: Vec::new(),
            record_block_trace,
            block_trace: Vec::new(),
            resume_skip_trace: false,
            created_address,
            shadow_context,
            params,
            started: false,
        })
    }

    /// Run the execution to completion or to the first tracer pause.
    pub fn execute(&mut self) -> Result<VmOutcome, VMError> {
        if !self.started {
            self.started = true;

            if let Some(early) = self.prepare_execution()? {
                let report = self.finalize_execution(early)?;
                return Ok(VmOutcome::Done(report));
            }

            if let CallParams::Call { to, .. } = &self.params {
                let to = *to;
                if !self.env.config.no_precompiles
                    && precompiles::is_precompile(&to, self.env.config.fork)
                {
                    let ctx_result = self.execute_precompile_frame()?;
                    let report = self.finalize_execution(ctx_result)?;
                    return Ok(VmOutcome::Done(report));
                }
            }
        }

        self.run_to_outcome()
    }

    /// Re-enter a paused execution. The instruction the tracer paused on
    /// runs without a second `before` callback.
    pub fn resume(&mut self) -> Result<VmOutcome, VMError> {
        if !self.started {
            return self.execute();
        }
        self.resume_skip_trace = true;
        self.run_to_outcome()
    }

    /// Project a finished report into the caller-facing `CallResult`.
    pub fn call_result(&self, report: &ExecutionReport) -> CallResult {
        CallResult {
            success: report.is_success(),
            gas_remaining: self.params.gas().saturating_sub(report.gas_used),
            output: report.output.clone(),
            created_address: if report.is_success() {
                self.created_address
            } else {
                None
            },
        }
    }

    fn run_to_outcome(&mut self) -> Result<VmOutcome, VMError> {
        let outcome = match self.mode {
            InterpreterMode::Analysis => self.run_analysis_loop()?,
            InterpreterMode::PcWalk => self.run_pc_loop()?,
        };
        match outcome {
            LoopOutcome::Paused => Ok(VmOutcome::Paused),
            LoopOutcome::Done(ctx_result) => {
                Ok(VmOutcome::Done(self.finalize_execution(ctx_result)?))
            }
        }
    }

    /// Transaction-entry work: warm sets, snapshot, value transfer, and the
    /// create-specific prologue. Returns an early result when execution
    /// cannot start.
    fn prepare_execution(&mut self) -> Result<Option<ContextResult>, VMError> {
        let fork = self.env.config.fork;

        self.host.warm_account(self.env.origin);
        if fork >= Fork::Shanghai {
            self.host.warm_account(self.env.coinbase);
        }
        if !self.env.config.no_precompiles {
            for number in 1..=precompiles::precompile_count(fork) {
                self.host.warm_account(Address::from_low_u64_be(number));
            }
        }
        let access_list = self.env.access_list.clone();
        for (address, keys) in access_list {
            self.host.warm_account(address);
            for key in keys {
                self.host.warm_slot(address, key);
            }
        }
        self.host.warm_account(self.current_call_frame.to);

        let from = self.current_call_frame.msg_sender;
        let to = self.current_call_frame.to;
        let value = self.current_call_frame.msg_value;
        let gas_limit = self.current_call_frame.gas_limit;

        if self.host.balance(from)? < value {
            return Ok(Some(ContextResult {
                result: TxResult::Revert(
                    InternalError::Custom("insufficient balance for value transfer".to_string())
                        .into(),
                ),
                gas_used: 0,
                output: Bytes::new(),
            }));
        }

        if self.current_call_frame.is_create {
            if self.host.nonce(from)? == u64::MAX {
                return Ok(Some(ContextResult {
                    result: TxResult::Revert(
                        InternalError::Custom("sender nonce at maximum".to_string()).into(),
                    ),
                    gas_used: 0,
                    output: Bytes::new(),
                }));
            }
            if self.host.create_would_collide(to)? {
                // A collision consumes everything.
                return Ok(Some(ContextResult {
                    result: TxResult::Revert(
                        InternalError::Custom("create address collision".to_string()).into(),
                    ),
                    gas_used: gas_limit,
                    output: Bytes::new(),
                }));
            }
            // The sender's nonce burn stays outside the revert window.
            self.host.increment_nonce(from)?;
        }

        // Everything from here reverts with the frame: created-account
        // state, the value transfer, and all execution effects.
        self.current_call_frame.snapshot = self.host.snapshot();

        if self.current_call_frame.is_create {
            self.host.mark_created(to);
            if fork >= Fork::SpuriousDragon {
                self.host.set_nonce(to, 1)?;
            }
        }

        self.host.transfer(from, to, value)?;

        Ok(None)
    }

    /// Direct precompile execution for a top-level call to one of the
    /// reserved addresses.
    fn execute_precompile_frame(&mut self) -> Result<ContextResult, VMError> {
        let fork = self.env.config.fork;
        let frame = &mut self.current_call_frame;
        let mut gas_remaining = frame.gas_remaining_clamped();

        match precompiles::execute_precompile(
            frame.code_address,
            &frame.calldata,
            &mut gas_remaining,
            fork,
        ) {
            Ok(output) => {
                frame.gas_remaining = i64::try_from(gas_remaining).unwrap_or(i64::MAX);
                frame.output = output.clone();
                Ok(ContextResult {
                    result: TxResult::Success,
                    gas_used: frame.gas_used(),
                    output,
                })
            }
            Err(error) => {
                frame.gas_remaining = 0;
                let snapshot = frame.snapshot;
                self.host.rollback(snapshot);
                Ok(ContextResult {
                    result: TxResult::Revert(error.into()),
                    gas_used: self.current_call_frame.gas_limit,
                    output: Bytes::new(),
                })
            }
        }
    }

    /// Settle an execution: apply the refund cap, finalise self-destructs,
    /// collect logs, notify the tracer and run the shadow comparison.
    fn finalize_execution(&mut self, ctx_result: ContextResult) -> Result<ExecutionReport, VMError> {
        let schedule = GasSchedule::for_fork(self.env.config.fork);

        let gas_refunded = if ctx_result.is_success() {
            self.host
                .refunded_gas()
                .min(ctx_result.gas_used / schedule.refund_quotient.max(1))
        } else {
            0
        };
        let gas_used = ctx_result.gas_used.saturating_sub(gas_refunded);

        if ctx_result.is_success() {
            self.host.process_selfdestructs();
        }
        // A failed execution already rolled its logs back with the journal.
        let logs = self.host.take_logs();
        self.host.finish_transaction();

        if let Some(tracer) = &self.tracer {
            tracer
                .borrow_mut()
                .finalize(&ctx_result.output, ctx_result.is_success());
        }

        let report = ExecutionReport {
            result: ctx_result.result,
            gas_used,
            gas_refunded,
            output: ctx_result.output,
            logs,
        };

        if let Some(shadow) = self.shadow_context.take() {
            let trace = std::mem::take(&mut self.block_trace);
            self.shadow_mismatches =
                shadow.run_and_compare(&report, &trace, self.env.config.shadow_fail_fast);
        }

        Ok(report)
    }

    // ----- frame plumbing -----

    pub(crate) fn add_callframe(&mut self, frame: CallFrame) {
        let parent = std::mem::replace(&mut self.current_call_frame, frame);
        self.call_frames.push(parent);
    }

    pub(crate) fn pop_call_frame(&mut self) -> Result<CallFrame, VMError> {
        let parent = self
            .call_frames
            .pop()
            .ok_or(InternalError::EmptyCallFrameStack)?;
        Ok(std::mem::replace(&mut self.current_call_frame, parent))
    }

    /// Fetch a pooled stack for a child frame.
    pub(crate) fn take_pooled_stack(&mut self) -> Stack {
        let mut stack = self.stack_pool.pop().unwrap_or_default();
        stack.clear();
        stack
    }

    // ----- tracer plumbing -----

    /// `before` hook. Returns the control decision, honouring the
    /// resume-after-pause bypass.
    pub(crate) fn trace_before(&mut self, pc: usize, opcode: u8) -> TraceControl {
        let Some(tracer) = self.tracer.clone() else {
            return TraceControl::Continue;
        };
        if self.resume_skip_trace {
            self.resume_skip_trace = false;
            return TraceControl::Continue;
        }
        let frame = &self.current_call_frame;
        let step = StepInfo {
            pc,
            opcode,
            gas_remaining: frame.gas_remaining_clamped(),
            depth: frame.depth,
            address: frame.to,
            caller: frame.msg_sender,
            is_static: frame.is_static,
            stack_size: frame.stack.len(),
            memory_size: frame.memory.len(),
        };
        tracer.borrow_mut().before(&step)
    }

    /// `after` hook: bounded snapshots plus the step's journaled deltas.
    pub(crate) fn trace_after(
        &mut self,
        journal_before: usize,
        gas_before: u64,
        error: Option<&VMError>,
    ) {
        let Some(tracer) = self.tracer.clone() else {
            return;
        };

        let mut storage_deltas = Vec::new();
        let mut logs_emitted = 0usize;
        for entry in self.host.journal_entries_since(journal_before) {
            match entry {
                crate::journal::JournalEntry::StorageChange { address, key, .. } => {
                    storage_deltas.push((*address, *key));
                }
                crate::journal::JournalEntry::LogEmitted => {
                    logs_emitted = logs_emitted.saturating_add(1);
                }
                _ => {}
            }
        }

        let frame = &mut self.current_call_frame;
        let gas_after = frame.gas_remaining_clamped();
        let stack = if frame.stack.len() <= self.tracer_config.stack_max_items {
            Some(frame.stack.top_slice(self.tracer_config.stack_max_items))
        } else {
            None
        };
        let memory = if frame.memory.len() <= self.tracer_config.memory_max_bytes {
            frame.memory.load_range(0, frame.memory.len()).ok()
        } else {
            None
        };

        let result = StepResult {
            gas_after,
            gas_cost: gas_before.saturating_sub(gas_after),
            stack,
            memory,
            storage_deltas,
            logs_emitted,
            error: error.cloned(),
        };
        tracer.borrow_mut().after(&result);
    }

    /// Tracer-initiated abort: everything rolls back, the caller sees a
    /// failed call with all gas consumed.
    pub(crate) fn abort_by_tracer(&mut self) -> ContextResult {
        let snapshot = self
            .call_frames
            .first()
            .map(|frame| frame.snapshot)
            .unwrap_or(self.current_call_frame.snapshot);
        self.host.rollback(snapshot);
        ContextResult {
            result: TxResult::Revert(
                InternalError::Custom("execution stopped by tracer".to_string()).into(),
            ),
            gas_used: self.params.gas(),
            output: Bytes::new(),
        }
    }

    /// Record a block-entry fingerprint for the shadow comparator. Skips
    /// the implicit trailing-STOP block, which only the analysis stream
    /// materialises.
    pub(crate) fn record_block_summary(&mut self, pc: usize) {
        if !self.record_block_trace || pc >= self.current_call_frame.bytecode.len() {
            return;
        }
        let frame = &self.current_call_frame;
        self.block_trace.push(BlockSummary {
            pc,
            gas_remaining: frame.gas_remaining,
            stack_top: frame.stack.top_slice(crate::shadow::SHADOW_STACK_ITEMS),
            memory_size: frame.memory.len(),
        });
    }
}

impl From<PrecompileError> for VMError {
    fn from(error: PrecompileError) -> Self {
        match error {
            PrecompileError::OutOfGas => crate::errors::ExceptionalHalt::OutOfGas.into(),
            PrecompileError::Failure => crate::errors::ExceptionalHalt::PrecompileFailure.into(),
        }
    }
}
