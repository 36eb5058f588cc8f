use crate::{
    errors::{OpcodeResult, VMError},
    gas_cost,
    memory::calculate_memory_size,
    utils::size_offset_to_usize,
    vm::VM,
};
use kestrel_common::utils::{keccak_hash, u256_from_big_endian_const};

// KECCAK256 (1)

impl VM {
    // KECCAK256 operation
    pub fn op_keccak256(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let [offset, size] = current_call_frame.stack.pop()?;
        let (size, offset) = size_offset_to_usize(size, offset)?;

        let new_memory_size = calculate_memory_size(offset, size)?;
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        let word_cost = gas_cost::keccak256_words(size)?;
        current_call_frame.increase_consumed_gas(
            word_cost
                .checked_add(expansion_cost)
                .ok_or(crate::errors::ExceptionalHalt::OutOfGas)?,
        )?;

        let data = current_call_frame.memory.load_range(offset, size)?;
        current_call_frame
            .stack
            .push(u256_from_big_endian_const(keccak_hash(&data)))?;

        Ok(OpcodeResult::Continue)
    }
}
