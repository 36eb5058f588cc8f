use crate::{
    errors::{ExceptionalHalt, OpcodeResult, VMError},
    gas_cost,
    memory::calculate_memory_size,
    utils::{size_offset_to_usize, u256_to_h256},
    vm::VM,
};
use kestrel_common::types::Log;

// Logging Operations (5)
// Opcodes: LOG0 ... LOG4

impl VM {
    // Generic LOG operation, monomorphised per topic count.
    pub fn op_log<const N_TOPICS: usize>(&mut self) -> Result<OpcodeResult, VMError> {
        if self.current_call_frame.is_static {
            return Err(ExceptionalHalt::StateModificationInStatic.into());
        }

        let current_call_frame = &mut self.current_call_frame;
        let [offset, size] = current_call_frame.stack.pop()?;
        let (size, offset) = size_offset_to_usize(size, offset)?;

        let mut topics = Vec::with_capacity(N_TOPICS);
        for _ in 0..N_TOPICS {
            topics.push(u256_to_h256(current_call_frame.stack.pop1()?));
        }

        let new_memory_size = calculate_memory_size(offset, size)?;
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        let topic_count = u64::try_from(N_TOPICS).map_err(|_| ExceptionalHalt::OutOfGas)?;
        current_call_frame.increase_consumed_gas(
            gas_cost::log_dynamic(topic_count, size)?
                .checked_add(expansion_cost)
                .ok_or(ExceptionalHalt::OutOfGas)?,
        )?;

        let data = current_call_frame.memory.load_range(offset, size)?;
        let log = Log {
            address: current_call_frame.to,
            topics,
            data,
        };
        self.host.emit_log(log);

        Ok(OpcodeResult::Continue)
    }
}
