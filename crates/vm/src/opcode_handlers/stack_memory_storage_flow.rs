use crate::{
    errors::{ExceptionalHalt, OpcodeResult, VMError},
    gas_cost,
    gas_schedule::GasSchedule,
    memory::calculate_memory_size,
    utils::{size_offset_to_usize, u256_to_h256, u256_to_usize},
    vm::VM,
};
use kestrel_common::{U256, utils::u256_to_big_endian};

// Stack, Memory, Storage and Flow Operations (15 + DUP/SWAP)
// Opcodes: POP, MLOAD, MSTORE, MSTORE8, SLOAD, SSTORE, JUMP, JUMPI, PC,
// MSIZE, GAS, JUMPDEST, TLOAD, TSTORE, MCOPY, DUP1..16, SWAP1..16

impl VM {
    // POP operation
    #[inline]
    pub fn op_pop(&mut self) -> Result<OpcodeResult, VMError> {
        self.current_call_frame.stack.pop1()?;
        Ok(OpcodeResult::Continue)
    }

    // MLOAD operation
    #[inline]
    pub fn op_mload(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let offset = u256_to_usize(current_call_frame.stack.pop1()?)?;

        let new_memory_size = calculate_memory_size(offset, 32)?;
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        current_call_frame.increase_consumed_gas(expansion_cost)?;

        let value = current_call_frame.memory.load_word(offset)?;
        current_call_frame.stack.push(value)?;

        Ok(OpcodeResult::Continue)
    }

    // MSTORE operation
    #[inline]
    pub fn op_mstore(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let [offset, value] = current_call_frame.stack.pop()?;
        let offset = u256_to_usize(offset)?;

        let new_memory_size = calculate_memory_size(offset, 32)?;
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        current_call_frame.increase_consumed_gas(expansion_cost)?;

        current_call_frame.memory.store_word(offset, value)?;

        Ok(OpcodeResult::Continue)
    }

    // MSTORE8 operation
    pub fn op_mstore8(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let [offset, value] = current_call_frame.stack.pop()?;
        let offset = u256_to_usize(offset)?;

        let new_memory_size = calculate_memory_size(offset, 1)?;
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        current_call_frame.increase_consumed_gas(expansion_cost)?;

        let byte = u256_to_big_endian(value);
        current_call_frame
            .memory
            .store_data(offset, byte.get(31..).unwrap_or_default())?;

        Ok(OpcodeResult::Continue)
    }

    // MCOPY operation (EIP-5656)
    pub fn op_mcopy(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let [dest_offset, src_offset, size] = current_call_frame.stack.pop()?;
        let (size, dest_offset) = size_offset_to_usize(size, dest_offset)?;
        let src_offset = if size == 0 {
            0
        } else {
            u256_to_usize(src_offset)?
        };

        let new_memory_size =
            calculate_memory_size(dest_offset, size)?.max(calculate_memory_size(src_offset, size)?);
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        current_call_frame.increase_consumed_gas(
            gas_cost::copy_words(size)?
                .checked_add(expansion_cost)
                .ok_or(ExceptionalHalt::OutOfGas)?,
        )?;

        current_call_frame
            .memory
            .copy_within(src_offset, dest_offset, size)?;

        Ok(OpcodeResult::Continue)
    }

    // MSIZE operation
    pub fn op_msize(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let size = U256::from(current_call_frame.memory.len());
        current_call_frame.stack.push(size)?;
        Ok(OpcodeResult::Continue)
    }

    // SLOAD operation
    pub fn op_sload(&mut self) -> Result<OpcodeResult, VMError> {
        let schedule = GasSchedule::for_fork(self.env.config.fork);
        let key = u256_to_h256(self.current_call_frame.stack.pop1()?);
        let address = self.current_call_frame.to;

        let was_cold = schedule.has_access_lists && self.host.warm_slot(address, key);
        self.current_call_frame
            .increase_consumed_gas(schedule.sload_cost(was_cold))?;

        let value = self.host.storage_get(address, key)?;
        self.current_call_frame.stack.push(value)?;

        Ok(OpcodeResult::Continue)
    }

    // SSTORE operation, with EIP-2200/2929/3529 net metering from Istanbul
    // and the original set/reset/clear rules before it.
    pub fn op_sstore(&mut self) -> Result<OpcodeResult, VMError> {
        if self.current_call_frame.is_static {
            return Err(ExceptionalHalt::StateModificationInStatic.into());
        }

        let schedule = GasSchedule::for_fork(self.env.config.fork);

        // EIP-2200 stipend sentry: refuse to run on a near-empty tank.
        if schedule.has_net_metering
            && self.current_call_frame.gas_remaining
                <= i64::try_from(gas_cost::SSTORE_SENTRY).unwrap_or(i64::MAX)
        {
            return Err(ExceptionalHalt::OutOfGas.into());
        }

        let [key, value] = self.current_call_frame.stack.pop()?;
        let address = self.current_call_frame.to;
        let key = u256_to_h256(key);

        let mut cost = 0u64;
        if schedule.has_access_lists && self.host.warm_slot(address, key) {
            cost = cost.saturating_add(schedule.cold_sload);
        }

        let current = self.host.storage_get(address, key)?;

        if schedule.has_net_metering {
            let original = self.host.storage_original(address, key)?;
            // Warm-read price: what a no-op write costs.
            let noop_cost = if schedule.has_access_lists {
                schedule.warm_sload
            } else {
                schedule.sload
            };

            if value == current {
                cost = cost.saturating_add(noop_cost);
            } else if current == original {
                if original.is_zero() {
                    cost = cost.saturating_add(schedule.sstore_set);
                } else {
                    cost = cost.saturating_add(schedule.sstore_reset);
                    if value.is_zero() {
                        self.host.add_refund(schedule.sstore_clears_refund);
                    }
                }
            } else {
                cost = cost.saturating_add(noop_cost);
                // Dirty-slot refund accounting.
                if !original.is_zero() {
                    if current.is_zero() {
                        self.host.remove_refund(schedule.sstore_clears_refund);
                    } else if value.is_zero() {
                        self.host.add_refund(schedule.sstore_clears_refund);
                    }
                }
                if value == original {
                    if original.is_zero() {
                        self.host
                            .add_refund(schedule.sstore_set.saturating_sub(noop_cost));
                    } else {
                        self.host
                            .add_refund(schedule.sstore_reset.saturating_sub(noop_cost));
                    }
                }
            }
        } else {
            if current.is_zero() && !value.is_zero() {
                cost = cost.saturating_add(schedule.sstore_set);
            } else {
                cost = cost.saturating_add(schedule.sstore_reset);
            }
            if !current.is_zero() && value.is_zero() {
                self.host.add_refund(schedule.sstore_clears_refund);
            }
        }

        self.current_call_frame.increase_consumed_gas(cost)?;
        self.host.storage_set(address, key, value)?;

        Ok(OpcodeResult::Continue)
    }

    // JUMP operation
    pub fn op_jump(&mut self) -> Result<OpcodeResult, VMError> {
        let destination = self.current_call_frame.stack.pop1()?;
        self.current_call_frame.jump_to(destination)?;
        Ok(OpcodeResult::Continue)
    }

    // JUMPI operation
    pub fn op_jumpi(&mut self) -> Result<OpcodeResult, VMError> {
        let [destination, condition] = self.current_call_frame.stack.pop()?;
        if !condition.is_zero() {
            self.current_call_frame.jump_to(destination)?;
        }
        Ok(OpcodeResult::Continue)
    }

    // PC operation. The analysis stream pre-decodes PC into a push
    // immediate; this handler serves the reference loop, where the counter
    // has already moved past the opcode.
    pub fn op_pc(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let pc = U256::from(current_call_frame.pc.saturating_sub(1));
        current_call_frame.stack.push(pc)?;
        Ok(OpcodeResult::Continue)
    }

    // GAS operation
    pub fn op_gas(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let gas = U256::from(current_call_frame.gas_remaining_clamped());
        current_call_frame.stack.push(gas)?;
        Ok(OpcodeResult::Continue)
    }

    // JUMPDEST operation: a marker, nothing to execute.
    pub fn op_jumpdest(&mut self) -> Result<OpcodeResult, VMError> {
        Ok(OpcodeResult::Continue)
    }

    // TLOAD operation (EIP-1153)
    pub fn op_tload(&mut self) -> Result<OpcodeResult, VMError> {
        let key = self.current_call_frame.stack.pop1()?;
        let value = self.host.transient_get(self.current_call_frame.to, key);
        self.current_call_frame.stack.push(value)?;
        Ok(OpcodeResult::Continue)
    }

    // TSTORE operation (EIP-1153)
    pub fn op_tstore(&mut self) -> Result<OpcodeResult, VMError> {
        if self.current_call_frame.is_static {
            return Err(ExceptionalHalt::StateModificationInStatic.into());
        }
        let [key, value] = self.current_call_frame.stack.pop()?;
        self.host
            .transient_set(self.current_call_frame.to, key, value);
        Ok(OpcodeResult::Continue)
    }

    // Generic DUP operation; `DEPTH` slots below the top, zero-based.
    #[inline]
    pub fn op_dup<const DEPTH: usize>(&mut self) -> Result<OpcodeResult, VMError> {
        self.current_call_frame.stack.dup(DEPTH)?;
        Ok(OpcodeResult::Continue)
    }

    // Generic SWAP operation; exchanges the top with `DEPTH` slots below.
    #[inline]
    pub fn op_swap<const DEPTH: usize>(&mut self) -> Result<OpcodeResult, VMError> {
        self.current_call_frame.stack.swap(DEPTH)?;
        Ok(OpcodeResult::Continue)
    }
}
