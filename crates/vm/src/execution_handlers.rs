//! Frame completion: success/revert/exceptional classification, contract
//! deployment validation, and the shared frame-exit path of both loops.

use crate::{
    constants::{EOF_PREFIX, MAX_CODE_SIZE},
    errors::{ContextResult, ExceptionalHalt, OpcodeResult, TxResult, VMError},
    gas_cost,
    vm::{LoopOutcome, VM},
};
use bytes::Bytes;
use kestrel_common::types::{Code, Fork};

impl VM {
    /// Shared tail of both interpreter loops: settle the current frame if
    /// the step halted or failed, then hand the result to the parent (or
    /// the caller when this was the top frame).
    pub(crate) fn settle_frame(
        &mut self,
        step: Result<OpcodeResult, VMError>,
    ) -> Result<Option<LoopOutcome>, VMError> {
        let ctx_result = match step {
            Ok(OpcodeResult::Continue) => return Ok(None),
            Ok(OpcodeResult::Halt) => self.handle_opcode_result()?,
            Err(error) => {
                if error.should_propagate() {
                    return Err(error);
                }
                self.handle_opcode_error(error)?
            }
        };

        if self.call_frames.is_empty() {
            return Ok(Some(LoopOutcome::Done(ctx_result)));
        }
        self.handle_return(&ctx_result)?;
        Ok(None)
    }

    /// The frame halted successfully (STOP, RETURN, SELFDESTRUCT).
    pub(crate) fn handle_opcode_result(&mut self) -> Result<ContextResult, VMError> {
        if self.current_call_frame.is_create
            && let Err(error) = self.validate_contract_creation()
        {
            if error.should_propagate() {
                return Err(error);
            }
            return self.handle_opcode_error(error);
        }

        let snapshot = self.current_call_frame.snapshot;
        self.host.commit(snapshot);

        let frame = &mut self.current_call_frame;
        Ok(ContextResult {
            result: TxResult::Success,
            gas_used: frame.gas_used(),
            output: std::mem::take(&mut frame.output),
        })
    }

    /// The frame failed: classify, roll back its snapshot, and burn the
    /// remaining gas unless this is a REVERT.
    pub(crate) fn handle_opcode_error(&mut self, error: VMError) -> Result<ContextResult, VMError> {
        if error.should_propagate() {
            return Err(error);
        }

        let snapshot = self.current_call_frame.snapshot;
        self.host.rollback(snapshot);

        let frame = &mut self.current_call_frame;
        let output = if error.is_revert_opcode() {
            std::mem::take(&mut frame.output)
        } else {
            frame.gas_remaining = 0;
            Bytes::new()
        };

        Ok(ContextResult {
            result: TxResult::Revert(error),
            gas_used: frame.gas_used(),
            output,
        })
    }

    /// A create frame returned deployment bytecode: enforce EIP-3541 and
    /// EIP-170, charge the code deposit, and persist the code.
    fn validate_contract_creation(&mut self) -> Result<(), VMError> {
        let fork = self.env.config.fork;
        let code = self.current_call_frame.output.clone();

        if fork >= Fork::London && code.first() == Some(&EOF_PREFIX) {
            return Err(ExceptionalHalt::InvalidContractPrefix.into());
        }
        if fork >= Fork::SpuriousDragon && code.len() > MAX_CODE_SIZE {
            return Err(ExceptionalHalt::MaxCodeSizeExceeded.into());
        }

        let deposit = gas_cost::code_deposit(code.len())?;
        if let Err(error) = self.current_call_frame.increase_consumed_gas(deposit) {
            if fork < Fork::Homestead {
                // Frontier: an unaffordable deposit leaves the account
                // without code instead of failing the create.
                self.current_call_frame.output = Bytes::new();
                return Ok(());
            }
            return Err(error);
        }

        let address = self.current_call_frame.to;
        self.host.set_code(address, Code::from_bytecode(code))?;
        Ok(())
    }
}
