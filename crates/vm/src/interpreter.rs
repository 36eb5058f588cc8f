//! The main interpreter loop: walks the pre-analysed instruction stream
//! with amortised block-level gas and stack validation.

use crate::{
    analysis::Instruction,
    constants::STACK_LIMIT,
    errors::{ExceptionalHalt, InternalError, OpcodeResult, VMError},
    tracer::TraceControl,
    vm::{LoopOutcome, VM},
};

impl VM {
    pub(crate) fn run_analysis_loop(&mut self) -> Result<LoopOutcome, VMError> {
        loop {
            let analysis = self.current_call_frame.analysis.clone();
            let ip = self.current_call_frame.ip;
            let Some(instruction) = analysis.instructions.get(ip).copied() else {
                return Err(InternalError::InstructionOutOfBounds.into());
            };
            let pc = analysis
                .pcs
                .get(ip)
                .copied()
                .map(|pc| usize::try_from(pc).unwrap_or(usize::MAX))
                .unwrap_or(usize::MAX);
            let opcode = analysis.opcodes.get(ip).copied().unwrap_or_default();

            // Block headers validate and charge for the whole block before
            // any of its instructions run.
            if let Instruction::BlockInfo {
                gas_cost,
                stack_req,
                stack_max_growth,
            } = instruction
            {
                self.record_block_summary(pc);
                if let Err(error) = self.enter_block(gas_cost, stack_req, stack_max_growth) {
                    if let Some(outcome) = self.settle_frame(Err(error))? {
                        return Ok(outcome);
                    }
                    continue;
                }
                self.current_call_frame.ip = ip.wrapping_add(1);
                continue;
            }

            match self.trace_before(pc, opcode) {
                TraceControl::Continue => {}
                TraceControl::Pause => return Ok(LoopOutcome::Paused),
                TraceControl::Stop => return Ok(LoopOutcome::Done(self.abort_by_tracer())),
            }
            let journal_before = self.host.journal_len();
            let gas_before = self.current_call_frame.gas_remaining_clamped();

            self.current_call_frame.ip = ip.wrapping_add(1);
            self.current_call_frame.pc = pc;

            let step = match instruction {
                Instruction::Push(value) => self
                    .current_call_frame
                    .stack
                    .push(value)
                    .map(|_| OpcodeResult::Continue)
                    .map_err(Into::into),
                Instruction::Exec(handler) | Instruction::DynamicGas(handler) => handler(self),
                // Handled above; unreachable here.
                Instruction::BlockInfo { .. } => Ok(OpcodeResult::Continue),
            };

            if self.tracer.is_some() {
                self.trace_after(journal_before, gas_before, step.as_ref().err());
            }

            if let Some(outcome) = self.settle_frame(step)? {
                return Ok(outcome);
            }
        }
    }

    /// Block-entry sequence: gas check, underflow, overflow, then the
    /// deduction.
    fn enter_block(
        &mut self,
        gas_cost: u64,
        stack_req: u16,
        stack_max_growth: u16,
    ) -> Result<(), VMError> {
        let frame = &mut self.current_call_frame;

        let gas_cost_signed = i64::try_from(gas_cost).map_err(|_| ExceptionalHalt::OutOfGas)?;
        if frame.gas_remaining < gas_cost_signed {
            return Err(ExceptionalHalt::OutOfGas.into());
        }
        if frame.stack.len() < usize::from(stack_req) {
            return Err(ExceptionalHalt::StackUnderflow.into());
        }
        if frame
            .stack
            .len()
            .saturating_add(usize::from(stack_max_growth))
            > STACK_LIMIT
        {
            return Err(ExceptionalHalt::StackOverflow.into());
        }

        frame.gas_remaining = frame.gas_remaining.wrapping_sub(gas_cost_signed);
        Ok(())
    }
}
