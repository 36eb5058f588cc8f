use crate::{
    errors::{ExceptionalHalt, OpcodeResult, VMError},
    gas_cost,
    gas_schedule::GasSchedule,
    memory::calculate_memory_size,
    utils::{address_to_word, h256_to_u256, size_offset_to_usize, u256_to_usize, word_to_address},
    vm::VM,
};
use kestrel_common::{U256, utils::u256_from_big_endian_const};

// Environmental Information (16)
// Opcodes: ADDRESS, BALANCE, ORIGIN, CALLER, CALLVALUE, CALLDATALOAD,
// CALLDATASIZE, CALLDATACOPY, CODESIZE, CODECOPY, GASPRICE, EXTCODESIZE,
// EXTCODECOPY, RETURNDATASIZE, RETURNDATACOPY, EXTCODEHASH

impl VM {
    // ADDRESS operation
    pub fn op_address(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let address = current_call_frame.to; // The recipient of the current call.
        current_call_frame.stack.push(address_to_word(address))?;
        Ok(OpcodeResult::Continue)
    }

    // BALANCE operation
    pub fn op_balance(&mut self) -> Result<OpcodeResult, VMError> {
        let schedule = GasSchedule::for_fork(self.env.config.fork);
        let address = word_to_address(self.current_call_frame.stack.pop1()?);

        let was_cold = schedule.has_access_lists && self.host.warm_account(address);
        self.current_call_frame
            .increase_consumed_gas(schedule.account_access_cost(was_cold, schedule.balance))?;

        let balance = self.host.balance(address)?;
        self.current_call_frame.stack.push(balance)?;

        Ok(OpcodeResult::Continue)
    }

    // ORIGIN operation
    pub fn op_origin(&mut self) -> Result<OpcodeResult, VMError> {
        let origin = self.env.origin;
        self.current_call_frame.stack.push(address_to_word(origin))?;
        Ok(OpcodeResult::Continue)
    }

    // CALLER operation
    pub fn op_caller(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let caller = address_to_word(current_call_frame.msg_sender);
        current_call_frame.stack.push(caller)?;
        Ok(OpcodeResult::Continue)
    }

    // CALLVALUE operation
    pub fn op_callvalue(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let callvalue = current_call_frame.msg_value;
        current_call_frame.stack.push(callvalue)?;
        Ok(OpcodeResult::Continue)
    }

    // CALLDATALOAD operation
    #[inline]
    pub fn op_calldataload(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let offset = current_call_frame.stack.pop1()?;

        // Past the end of calldata there is only zero.
        let calldata_len = current_call_frame.calldata.len();
        let Ok(offset) = usize::try_from(offset) else {
            current_call_frame.stack.push_zero()?;
            return Ok(OpcodeResult::Continue);
        };
        if offset >= calldata_len {
            current_call_frame.stack.push_zero()?;
            return Ok(OpcodeResult::Continue);
        }

        let mut word = [0u8; 32];
        let available = calldata_len.wrapping_sub(offset).min(32);
        if let (Some(target), Some(source)) = (
            word.get_mut(..available),
            current_call_frame
                .calldata
                .get(offset..offset.wrapping_add(available)),
        ) {
            target.copy_from_slice(source);
        }

        current_call_frame
            .stack
            .push(u256_from_big_endian_const(word))?;

        Ok(OpcodeResult::Continue)
    }

    // CALLDATASIZE operation
    pub fn op_calldatasize(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let size = U256::from(current_call_frame.calldata.len());
        current_call_frame.stack.push(size)?;
        Ok(OpcodeResult::Continue)
    }

    // CALLDATACOPY operation
    pub fn op_calldatacopy(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let [dest_offset, calldata_offset, size] = current_call_frame.stack.pop()?;
        let (size, dest_offset) = size_offset_to_usize(size, dest_offset)?;
        let calldata_offset = u256_to_usize(calldata_offset).unwrap_or(usize::MAX);

        let new_memory_size = calculate_memory_size(dest_offset, size)?;
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        current_call_frame.increase_consumed_gas(
            gas_cost::copy_words(size)?
                .checked_add(expansion_cost)
                .ok_or(ExceptionalHalt::OutOfGas)?,
        )?;

        if size == 0 {
            return Ok(OpcodeResult::Continue);
        }

        let calldata_len = current_call_frame.calldata.len();
        let source = if calldata_offset < calldata_len {
            let copy_size = size.min(calldata_len.wrapping_sub(calldata_offset));
            current_call_frame
                .calldata
                .get(calldata_offset..calldata_offset.wrapping_add(copy_size))
                .unwrap_or_default()
                .to_vec()
        } else {
            Vec::new()
        };
        current_call_frame
            .memory
            .store_data_zero_padded(dest_offset, &source, size)?;

        Ok(OpcodeResult::Continue)
    }

    // CODESIZE operation
    pub fn op_codesize(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let size = U256::from(current_call_frame.bytecode.len());
        current_call_frame.stack.push(size)?;
        Ok(OpcodeResult::Continue)
    }

    // CODECOPY operation
    pub fn op_codecopy(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let [dest_offset, code_offset, size] = current_call_frame.stack.pop()?;
        let (size, dest_offset) = size_offset_to_usize(size, dest_offset)?;
        let code_offset = u256_to_usize(code_offset).unwrap_or(usize::MAX);

        let new_memory_size = calculate_memory_size(dest_offset, size)?;
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        current_call_frame.increase_consumed_gas(
            gas_cost::copy_words(size)?
                .checked_add(expansion_cost)
                .ok_or(ExceptionalHalt::OutOfGas)?,
        )?;

        if size == 0 {
            return Ok(OpcodeResult::Continue);
        }

        let code = &current_call_frame.bytecode.bytecode;
        let source = if code_offset < code.len() {
            let copy_size = size.min(code.len().wrapping_sub(code_offset));
            code.get(code_offset..code_offset.wrapping_add(copy_size))
                .unwrap_or_default()
                .to_vec()
        } else {
            Vec::new()
        };
        current_call_frame
            .memory
            .store_data_zero_padded(dest_offset, &source, size)?;

        Ok(OpcodeResult::Continue)
    }

    // GASPRICE operation
    pub fn op_gasprice(&mut self) -> Result<OpcodeResult, VMError> {
        let gas_price = self.env.gas_price;
        self.current_call_frame.stack.push(gas_price)?;
        Ok(OpcodeResult::Continue)
    }

    // EXTCODESIZE operation
    pub fn op_extcodesize(&mut self) -> Result<OpcodeResult, VMError> {
        let schedule = GasSchedule::for_fork(self.env.config.fork);
        let address = word_to_address(self.current_call_frame.stack.pop1()?);

        let was_cold = schedule.has_access_lists && self.host.warm_account(address);
        self.current_call_frame
            .increase_consumed_gas(schedule.account_access_cost(was_cold, schedule.extcodesize))?;

        let code_length = self.host.code_length(address)?;
        self.current_call_frame.stack.push(U256::from(code_length))?;

        Ok(OpcodeResult::Continue)
    }

    // EXTCODECOPY operation
    pub fn op_extcodecopy(&mut self) -> Result<OpcodeResult, VMError> {
        let schedule = GasSchedule::for_fork(self.env.config.fork);
        let [address, dest_offset, code_offset, size] = self.current_call_frame.stack.pop()?;
        let address = word_to_address(address);
        let (size, dest_offset) = size_offset_to_usize(size, dest_offset)?;
        let code_offset = u256_to_usize(code_offset).unwrap_or(usize::MAX);

        let was_cold = schedule.has_access_lists && self.host.warm_account(address);
        let new_memory_size = calculate_memory_size(dest_offset, size)?;
        let expansion_cost = self
            .current_call_frame
            .memory
            .expansion_cost(new_memory_size)?;
        let access_cost = schedule.account_access_cost(was_cold, schedule.extcodecopy_base);
        self.current_call_frame.increase_consumed_gas(
            gas_cost::copy_words(size)?
                .checked_add(expansion_cost)
                .and_then(|cost| cost.checked_add(access_cost))
                .ok_or(ExceptionalHalt::OutOfGas)?,
        )?;

        if size == 0 {
            return Ok(OpcodeResult::Continue);
        }

        let code = self.host.account_code(address)?;
        let source = if code_offset < code.len() {
            let copy_size = size.min(code.len().wrapping_sub(code_offset));
            code.bytecode
                .get(code_offset..code_offset.wrapping_add(copy_size))
                .unwrap_or_default()
                .to_vec()
        } else {
            Vec::new()
        };
        self.current_call_frame
            .memory
            .store_data_zero_padded(dest_offset, &source, size)?;

        Ok(OpcodeResult::Continue)
    }

    // RETURNDATASIZE operation (EIP-211)
    pub fn op_returndatasize(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let size = U256::from(current_call_frame.sub_return_data.len());
        current_call_frame.stack.push(size)?;
        Ok(OpcodeResult::Continue)
    }

    // RETURNDATACOPY operation (EIP-211)
    pub fn op_returndatacopy(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let [dest_offset, returndata_offset, size] = current_call_frame.stack.pop()?;
        let (size, dest_offset) = size_offset_to_usize(size, dest_offset)?;
        let returndata_offset = u256_to_usize(returndata_offset)?;

        let new_memory_size = calculate_memory_size(dest_offset, size)?;
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        current_call_frame.increase_consumed_gas(
            gas_cost::copy_words(size)?
                .checked_add(expansion_cost)
                .ok_or(ExceptionalHalt::OutOfGas)?,
        )?;

        // Unlike the other copies, reading past the end of return data is
        // an exceptional failure.
        let copy_limit = returndata_offset
            .checked_add(size)
            .ok_or(ExceptionalHalt::OutOfOffset)?;
        if copy_limit > current_call_frame.sub_return_data.len() {
            return Err(ExceptionalHalt::OutOfOffset.into());
        }

        if size == 0 {
            return Ok(OpcodeResult::Continue);
        }

        let source = current_call_frame
            .sub_return_data
            .get(returndata_offset..copy_limit)
            .unwrap_or_default()
            .to_vec();
        current_call_frame.memory.store_data(dest_offset, &source)?;

        Ok(OpcodeResult::Continue)
    }

    // EXTCODEHASH operation (EIP-1052)
    pub fn op_extcodehash(&mut self) -> Result<OpcodeResult, VMError> {
        let schedule = GasSchedule::for_fork(self.env.config.fork);
        let address = word_to_address(self.current_call_frame.stack.pop1()?);

        let was_cold = schedule.has_access_lists && self.host.warm_account(address);
        self.current_call_frame
            .increase_consumed_gas(schedule.account_access_cost(was_cold, schedule.extcodehash))?;

        // Empty accounts hash to zero (EIP-161 emptiness, not the empty
        // code hash).
        if self.host.account_is_empty(address)? {
            self.current_call_frame.stack.push_zero()?;
            return Ok(OpcodeResult::Continue);
        }

        let hash = self.host.code_hash(address)?;
        self.current_call_frame.stack.push(h256_to_u256(hash))?;

        Ok(OpcodeResult::Continue)
    }
}
