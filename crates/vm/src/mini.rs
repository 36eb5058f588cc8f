//! The reference interpreter: a PC walk over raw bytecode.
//!
//! No analysis, no block amortisation. Every instruction is validated and
//! charged individually from the dispatch table, then executed with the
//! same handler the main interpreter uses. Slower, but simple enough to
//! trust, which is the point: the shadow comparator runs it against the
//! analysis loop and any disagreement flags a bug.

use crate::{
    constants::STACK_LIMIT,
    dispatch::DispatchTable,
    errors::{ExceptionalHalt, OpcodeResult, VMError},
    tracer::TraceControl,
    vm::{LoopOutcome, VM},
};

impl VM {
    pub(crate) fn run_pc_loop(&mut self) -> Result<LoopOutcome, VMError> {
        let table = DispatchTable::for_fork(self.env.config.fork);
        loop {
            let pc = self.current_call_frame.pc;
            if self.current_call_frame.analysis.is_block_start(pc) {
                self.record_block_summary(pc);
            }
            let opcode = self.current_call_frame.next_opcode();

            match self.trace_before(pc, opcode) {
                TraceControl::Continue => {}
                TraceControl::Pause => return Ok(LoopOutcome::Paused),
                TraceControl::Stop => return Ok(LoopOutcome::Done(self.abort_by_tracer())),
            }
            let journal_before = self.host.journal_len();
            let gas_before = self.current_call_frame.gas_remaining_clamped();

            let step = self.step_pc(table, opcode);

            if self.tracer.is_some() {
                self.trace_after(journal_before, gas_before, step.as_ref().err());
            }

            if let Some(outcome) = self.settle_frame(step)? {
                return Ok(outcome);
            }
        }
    }

    /// Validate, charge and execute one opcode at the program counter.
    fn step_pc(
        &mut self,
        table: &'static DispatchTable,
        opcode: u8,
    ) -> Result<OpcodeResult, VMError> {
        let index = usize::from(opcode);
        if table.undefined.get(index).copied().unwrap_or(true) {
            return Err(ExceptionalHalt::InvalidOpcode.into());
        }

        let min_stack = usize::from(table.min_stack.get(index).copied().unwrap_or(0));
        let growth = usize::from(table.max_growth(opcode));
        let base_gas = table.base_gas.get(index).copied().unwrap_or(0);

        let frame = &mut self.current_call_frame;
        if frame.stack.len() < min_stack {
            return Err(ExceptionalHalt::StackUnderflow.into());
        }
        if frame.stack.len().saturating_add(growth) > STACK_LIMIT {
            return Err(ExceptionalHalt::StackOverflow.into());
        }
        frame.increase_consumed_gas(base_gas)?;
        frame.pc = frame.pc.wrapping_add(1);

        let handler = table
            .handlers
            .get(index)
            .copied()
            .unwrap_or(VM::on_invalid_opcode);
        handler(self)
    }
}
