use crate::{
    call_frame::CallFrame,
    constants::{FAIL, INIT_CODE_MAX_SIZE, SUCCESS},
    errors::{ContextResult, ExceptionalHalt, InternalError, OpcodeResult, TxResult, VMError},
    gas_cost,
    gas_schedule::GasSchedule,
    memory::calculate_memory_size,
    precompiles,
    utils::{
        address_to_word, calculate_create2_address, calculate_create_address, size_offset_to_usize,
        word_to_address,
    },
    vm::VM,
};
use bytes::Bytes;
use kestrel_common::{Address, H256, U256, types::{Code, Fork}};

// System Operations (10)
// Opcodes: CREATE, CALL, CALLCODE, RETURN, DELEGATECALL, CREATE2,
// STATICCALL, REVERT, INVALID, SELFDESTRUCT

impl VM {
    // STOP operation
    #[inline]
    pub fn op_stop(&mut self) -> Result<OpcodeResult, VMError> {
        Ok(OpcodeResult::Halt)
    }

    /// Table entry for bytes with no opcode at the active fork.
    pub fn on_invalid_opcode(&mut self) -> Result<OpcodeResult, VMError> {
        Err(ExceptionalHalt::InvalidOpcode.into())
    }

    // CALL operation
    pub fn op_call(&mut self) -> Result<OpcodeResult, VMError> {
        let [gas, callee, value, args_offset, args_size, ret_offset, ret_size] =
            self.current_call_frame.stack.pop()?;
        let callee = word_to_address(callee);
        let (args_size, args_offset) = size_offset_to_usize(args_size, args_offset)?;
        let (ret_size, ret_offset) = size_offset_to_usize(ret_size, ret_offset)?;

        if self.current_call_frame.is_static && !value.is_zero() {
            return Err(ExceptionalHalt::WriteProtection.into());
        }

        let schedule = GasSchedule::for_fork(self.env.config.fork);
        let was_cold = schedule.has_access_lists && self.host.warm_account(callee);
        let account_is_empty = self.host.account_is_empty(callee)?;

        let (gas_limit, new_memory_size) = self.charge_call_costs(
            schedule,
            gas,
            was_cold,
            args_offset,
            args_size,
            ret_offset,
            ret_size,
            value,
            !value.is_zero() && account_is_empty,
        )?;

        self.current_call_frame.memory.resize(new_memory_size)?;

        let from = self.current_call_frame.to; // The new sender is the current contract.
        let is_static = self.current_call_frame.is_static;
        let calldata = self
            .current_call_frame
            .memory
            .load_range(args_offset, args_size)?;

        self.generic_call(
            gas_limit, value, from, callee, callee, true, is_static, calldata, ret_offset, ret_size,
        )
    }

    // CALLCODE operation
    pub fn op_callcode(&mut self) -> Result<OpcodeResult, VMError> {
        let [gas, code_source, value, args_offset, args_size, ret_offset, ret_size] =
            self.current_call_frame.stack.pop()?;
        let code_source = word_to_address(code_source);
        let (args_size, args_offset) = size_offset_to_usize(args_size, args_offset)?;
        let (ret_size, ret_offset) = size_offset_to_usize(ret_size, ret_offset)?;

        let schedule = GasSchedule::for_fork(self.env.config.fork);
        let was_cold = schedule.has_access_lists && self.host.warm_account(code_source);

        // The value "transfer" is to self, so no new-account charge and no
        // static restriction.
        let (gas_limit, new_memory_size) = self.charge_call_costs(
            schedule,
            gas,
            was_cold,
            args_offset,
            args_size,
            ret_offset,
            ret_size,
            value,
            false,
        )?;

        self.current_call_frame.memory.resize(new_memory_size)?;

        let from = self.current_call_frame.to;
        let to = self.current_call_frame.to;
        let is_static = self.current_call_frame.is_static;
        let calldata = self
            .current_call_frame
            .memory
            .load_range(args_offset, args_size)?;

        self.generic_call(
            gas_limit,
            value,
            from,
            to,
            code_source,
            true,
            is_static,
            calldata,
            ret_offset,
            ret_size,
        )
    }

    // DELEGATECALL operation (EIP-7)
    pub fn op_delegatecall(&mut self) -> Result<OpcodeResult, VMError> {
        let [gas, code_source, args_offset, args_size, ret_offset, ret_size] =
            self.current_call_frame.stack.pop()?;
        let code_source = word_to_address(code_source);
        let (args_size, args_offset) = size_offset_to_usize(args_size, args_offset)?;
        let (ret_size, ret_offset) = size_offset_to_usize(ret_size, ret_offset)?;

        let schedule = GasSchedule::for_fork(self.env.config.fork);
        let was_cold = schedule.has_access_lists && self.host.warm_account(code_source);

        let (gas_limit, new_memory_size) = self.charge_call_costs(
            schedule,
            gas,
            was_cold,
            args_offset,
            args_size,
            ret_offset,
            ret_size,
            U256::zero(),
            false,
        )?;

        self.current_call_frame.memory.resize(new_memory_size)?;

        // Caller and value of the parent are preserved.
        let from = self.current_call_frame.msg_sender;
        let value = self.current_call_frame.msg_value;
        let to = self.current_call_frame.to;
        let is_static = self.current_call_frame.is_static;
        let calldata = self
            .current_call_frame
            .memory
            .load_range(args_offset, args_size)?;

        self.generic_call(
            gas_limit,
            value,
            from,
            to,
            code_source,
            false,
            is_static,
            calldata,
            ret_offset,
            ret_size,
        )
    }

    // STATICCALL operation (EIP-214)
    pub fn op_staticcall(&mut self) -> Result<OpcodeResult, VMError> {
        let [gas, callee, args_offset, args_size, ret_offset, ret_size] =
            self.current_call_frame.stack.pop()?;
        let callee = word_to_address(callee);
        let (args_size, args_offset) = size_offset_to_usize(args_size, args_offset)?;
        let (ret_size, ret_offset) = size_offset_to_usize(ret_size, ret_offset)?;

        let schedule = GasSchedule::for_fork(self.env.config.fork);
        let was_cold = schedule.has_access_lists && self.host.warm_account(callee);

        let (gas_limit, new_memory_size) = self.charge_call_costs(
            schedule,
            gas,
            was_cold,
            args_offset,
            args_size,
            ret_offset,
            ret_size,
            U256::zero(),
            false,
        )?;

        self.current_call_frame.memory.resize(new_memory_size)?;

        let from = self.current_call_frame.to;
        let calldata = self
            .current_call_frame
            .memory
            .load_range(args_offset, args_size)?;

        self.generic_call(
            gas_limit,
            U256::zero(),
            from,
            callee,
            callee,
            true,
            true,
            calldata,
            ret_offset,
            ret_size,
        )
    }

    // CREATE operation
    pub fn op_create(&mut self) -> Result<OpcodeResult, VMError> {
        let fork = self.env.config.fork;
        let current_call_frame = &mut self.current_call_frame;
        let [value, code_offset, code_size] = current_call_frame.stack.pop()?;
        let (code_size, code_offset) = size_offset_to_usize(code_size, code_offset)?;

        let new_memory_size = calculate_memory_size(code_offset, code_size)?;
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        let init_word_cost = if fork >= Fork::Shanghai {
            gas_cost::init_code_words(code_size)?
        } else {
            0
        };
        current_call_frame.increase_consumed_gas(
            expansion_cost
                .checked_add(init_word_cost)
                .ok_or(ExceptionalHalt::OutOfGas)?,
        )?;

        self.generic_create(value, code_offset, code_size, None)
    }

    // CREATE2 operation (EIP-1014)
    pub fn op_create2(&mut self) -> Result<OpcodeResult, VMError> {
        let fork = self.env.config.fork;
        let current_call_frame = &mut self.current_call_frame;
        let [value, code_offset, code_size, salt] = current_call_frame.stack.pop()?;
        let (code_size, code_offset) = size_offset_to_usize(code_size, code_offset)?;

        let new_memory_size = calculate_memory_size(code_offset, code_size)?;
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        let init_word_cost = if fork >= Fork::Shanghai {
            gas_cost::init_code_words(code_size)?
        } else {
            0
        };
        // CREATE2 also pays to hash the init code for the address.
        let hash_cost = gas_cost::keccak256_words(code_size)?;
        current_call_frame.increase_consumed_gas(
            expansion_cost
                .checked_add(init_word_cost)
                .and_then(|cost| cost.checked_add(hash_cost))
                .ok_or(ExceptionalHalt::OutOfGas)?,
        )?;

        self.generic_create(value, code_offset, code_size, Some(salt))
    }

    // RETURN operation
    #[inline]
    pub fn op_return(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let [offset, size] = current_call_frame.stack.pop()?;
        if size.is_zero() {
            return Ok(OpcodeResult::Halt);
        }

        let (size, offset) = size_offset_to_usize(size, offset)?;
        let new_memory_size = calculate_memory_size(offset, size)?;
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        current_call_frame.increase_consumed_gas(expansion_cost)?;

        current_call_frame.output = current_call_frame.memory.load_range(offset, size)?;

        Ok(OpcodeResult::Halt)
    }

    // REVERT operation (EIP-140). The rollback itself happens when the
    // frame settles.
    pub fn op_revert(&mut self) -> Result<OpcodeResult, VMError> {
        let current_call_frame = &mut self.current_call_frame;
        let [offset, size] = current_call_frame.stack.pop()?;
        let (size, offset) = size_offset_to_usize(size, offset)?;

        let new_memory_size = calculate_memory_size(offset, size)?;
        let expansion_cost = current_call_frame.memory.expansion_cost(new_memory_size)?;
        current_call_frame.increase_consumed_gas(expansion_cost)?;

        current_call_frame.output = current_call_frame.memory.load_range(offset, size)?;

        Err(VMError::RevertOpcode)
    }

    /// INVALID operation: halts consuming all remaining gas.
    pub fn op_invalid(&mut self) -> Result<OpcodeResult, VMError> {
        Err(ExceptionalHalt::InvalidOpcode.into())
    }

    // SELFDESTRUCT operation
    pub fn op_selfdestruct(&mut self) -> Result<OpcodeResult, VMError> {
        if self.current_call_frame.is_static {
            return Err(ExceptionalHalt::StateModificationInStatic.into());
        }

        let fork = self.env.config.fork;
        let schedule = GasSchedule::for_fork(fork);
        let beneficiary = word_to_address(self.current_call_frame.stack.pop1()?);
        let destroyed = self.current_call_frame.to;

        let was_cold = schedule.has_access_lists && self.host.warm_account(beneficiary);
        let balance = self.host.balance(destroyed)?;
        let beneficiary_is_empty = self.host.account_is_empty(beneficiary)?;

        let mut cost = schedule.selfdestruct;
        if was_cold {
            cost = cost.saturating_add(schedule.cold_account_access);
        }
        let charges_new_account = if fork >= Fork::SpuriousDragon {
            beneficiary_is_empty && !balance.is_zero()
        } else {
            beneficiary_is_empty
        };
        if fork >= Fork::Tangerine && charges_new_account {
            cost = cost.saturating_add(schedule.selfdestruct_new_account);
        }
        self.current_call_frame.increase_consumed_gas(cost)?;

        if fork >= Fork::Cancun {
            // EIP-6780: the balance always moves, but the account is only
            // queued for deletion when it was created in this transaction
            // (a self-beneficiary then burns the funds).
            self.host.transfer(destroyed, beneficiary, balance)?;
            if self.host.is_account_created(destroyed) {
                self.host.set_balance(destroyed, U256::zero())?;
                self.host.register_selfdestruct(destroyed);
            }
        } else {
            self.host.add_balance(beneficiary, balance)?;
            self.host.set_balance(destroyed, U256::zero())?;
            let already_queued = self.host.register_selfdestruct(destroyed);
            if !already_queued && schedule.selfdestruct_refund > 0 {
                self.host.add_refund(schedule.selfdestruct_refund);
            }
        }

        Ok(OpcodeResult::Halt)
    }

    /// Shared CALL-family gas sequence: memory expansion, cold-access,
    /// value and new-account surcharges, then the 63/64-capped forwarding
    /// resolution and the stipend. Returns the child gas limit and the new
    /// memory size.
    #[allow(clippy::too_many_arguments)]
    fn charge_call_costs(
        &mut self,
        schedule: &GasSchedule,
        gas: U256,
        address_was_cold: bool,
        args_offset: usize,
        args_size: usize,
        ret_offset: usize,
        ret_size: usize,
        value: U256,
        charges_new_account: bool,
    ) -> Result<(u64, usize), VMError> {
        let new_memory_size =
            calculate_memory_size(args_offset, args_size)?.max(calculate_memory_size(ret_offset, ret_size)?);
        let expansion_cost = self
            .current_call_frame
            .memory
            .expansion_cost(new_memory_size)?;

        let access_cost = schedule.call_cost(address_was_cold);
        let value_cost = if value.is_zero() {
            0
        } else {
            gas_cost::CALL_POSITIVE_VALUE
        };
        let new_account_cost = if charges_new_account {
            schedule.call_new_account
        } else {
            0
        };

        let upfront = expansion_cost
            .checked_add(access_cost)
            .and_then(|cost| cost.checked_add(value_cost))
            .and_then(|cost| cost.checked_add(new_account_cost))
            .ok_or(ExceptionalHalt::OutOfGas)?;
        self.current_call_frame.increase_consumed_gas(upfront)?;

        let available = self.current_call_frame.gas_remaining_clamped();
        let forwarded = gas_cost::requested_call_gas(gas, available, schedule)?;
        self.current_call_frame.increase_consumed_gas(forwarded)?;

        let stipend = if value.is_zero() {
            0
        } else {
            gas_cost::CALL_STIPEND
        };
        let gas_limit = forwarded
            .checked_add(stipend)
            .ok_or(InternalError::Overflow)?;

        Ok((gas_limit, new_memory_size))
    }

    /// Common tail of the CALL family: depth/balance validation,
    /// precompile short-circuit, and child frame construction.
    #[allow(clippy::too_many_arguments)]
    pub fn generic_call(
        &mut self,
        gas_limit: u64,
        value: U256,
        msg_sender: Address,
        to: Address,
        code_address: Address,
        should_transfer_value: bool,
        is_static: bool,
        calldata: Bytes,
        ret_offset: usize,
        ret_size: usize,
    ) -> Result<OpcodeResult, VMError> {
        self.current_call_frame.sub_return_data = Bytes::new();

        if should_transfer_value
            && !value.is_zero()
            && self.host.balance(msg_sender)? < value
        {
            return self.early_revert_message_call(gas_limit);
        }

        let new_depth = self
            .current_call_frame
            .depth
            .checked_add(1)
            .ok_or(InternalError::Overflow)?;
        if new_depth > self.env.config.max_call_depth {
            return self.early_revert_message_call(gas_limit);
        }

        let fork = self.env.config.fork;
        if !self.env.config.no_precompiles && precompiles::is_precompile(&code_address, fork) {
            return self.precompile_message_call(
                gas_limit,
                value,
                msg_sender,
                to,
                code_address,
                should_transfer_value,
                &calldata,
                ret_offset,
                ret_size,
            );
        }

        let snapshot = self.host.snapshot();
        let code = self.host.account_code(code_address)?;
        let analysis = self.host.analysis(&code, fork);
        let stack = self.take_pooled_stack();
        let next_memory = self.current_call_frame.memory.next_memory();

        let mut new_call_frame = CallFrame::new(
            msg_sender,
            to,
            code_address,
            code,
            analysis,
            value,
            calldata,
            is_static,
            gas_limit,
            new_depth,
            should_transfer_value,
            false,
            ret_offset,
            ret_size,
            stack,
            next_memory,
        );
        new_call_frame.snapshot = snapshot;
        self.add_callframe(new_call_frame);

        if should_transfer_value {
            self.host.transfer(msg_sender, to, value)?;
        }

        Ok(OpcodeResult::Continue)
    }

    /// Run a precompile as a message call, inline in the caller's frame.
    #[allow(clippy::too_many_arguments)]
    fn precompile_message_call(
        &mut self,
        gas_limit: u64,
        value: U256,
        msg_sender: Address,
        to: Address,
        code_address: Address,
        should_transfer_value: bool,
        calldata: &Bytes,
        ret_offset: usize,
        ret_size: usize,
    ) -> Result<OpcodeResult, VMError> {
        let mut gas_remaining = gas_limit;
        let result = precompiles::execute_precompile(
            code_address,
            calldata,
            &mut gas_remaining,
            self.env.config.fork,
        );

        match result {
            Ok(output) => {
                let frame = &mut self.current_call_frame;
                frame.return_gas(gas_remaining)?;
                let copy_len = output.len().min(ret_size);
                frame
                    .memory
                    .store_data(ret_offset, output.get(..copy_len).unwrap_or_default())?;
                frame.sub_return_data = output;
                frame.stack.push(SUCCESS)?;

                if should_transfer_value {
                    self.host.transfer(msg_sender, to, value)?;
                }
            }
            Err(_) => {
                // The forwarded gas is gone.
                self.current_call_frame.stack.push(FAIL)?;
            }
        }

        Ok(OpcodeResult::Continue)
    }

    /// Common behaviour of CREATE and CREATE2.
    pub fn generic_create(
        &mut self,
        value: U256,
        code_offset: usize,
        code_size: usize,
        salt: Option<U256>,
    ) -> Result<OpcodeResult, VMError> {
        let fork = self.env.config.fork;
        let schedule = GasSchedule::for_fork(fork);

        // EIP-3860: oversized init code fails outright.
        if fork >= Fork::Shanghai && code_size > INIT_CODE_MAX_SIZE {
            return Err(ExceptionalHalt::OutOfGas.into());
        }
        if self.current_call_frame.is_static {
            return Err(ExceptionalHalt::StateModificationInStatic.into());
        }

        self.current_call_frame.sub_return_data = Bytes::new();

        // Reserve the child's allowance.
        let gas_limit = gas_cost::max_message_call_gas(
            self.current_call_frame.gas_remaining_clamped(),
            schedule,
        );
        self.current_call_frame.increase_consumed_gas(gas_limit)?;

        let init_code = self
            .current_call_frame
            .memory
            .load_range(code_offset, code_size)?;

        let deployer = self.current_call_frame.to;
        let deployer_balance = self.host.balance(deployer)?;
        let deployer_nonce = self.host.nonce(deployer)?;

        let new_address = match salt {
            Some(salt) => calculate_create2_address(deployer, &init_code, salt),
            None => calculate_create_address(deployer, deployer_nonce),
        };

        let new_depth = self
            .current_call_frame
            .depth
            .checked_add(1)
            .ok_or(InternalError::Overflow)?;

        // These push 0 and hand the reserved gas back.
        if deployer_balance < value
            || new_depth > self.env.config.max_call_depth
            || deployer_nonce == u64::MAX
        {
            return self.early_revert_message_call(gas_limit);
        }

        if schedule.has_access_lists {
            self.host.warm_account(new_address);
        }

        // The nonce burn survives even a failed deployment.
        self.host.increment_nonce(deployer)?;

        // A collision burns the reserved gas too.
        if self.host.create_would_collide(new_address)? {
            self.current_call_frame.stack.push(FAIL)?;
            return Ok(OpcodeResult::Continue);
        }

        let snapshot = self.host.snapshot();
        let code = Code::from_bytecode_unchecked(init_code, H256::zero());
        let analysis = self.host.analysis(&code, fork);
        let stack = self.take_pooled_stack();
        let next_memory = self.current_call_frame.memory.next_memory();

        let mut new_call_frame = CallFrame::new(
            deployer,
            new_address,
            new_address,
            code,
            analysis,
            value,
            Bytes::new(),
            false,
            gas_limit,
            new_depth,
            true,
            true,
            0,
            0,
            stack,
            next_memory,
        );
        new_call_frame.snapshot = snapshot;
        self.add_callframe(new_call_frame);

        // Reverted with the snapshot if the init code fails.
        self.host.mark_created(new_address);
        if fork >= Fork::SpuriousDragon {
            self.host.set_nonce(new_address, 1)?;
        }
        self.host.transfer(deployer, new_address, value)?;

        Ok(OpcodeResult::Continue)
    }

    /// Hand a completed child frame's result back to its parent.
    pub(crate) fn handle_return(&mut self, ctx_result: &ContextResult) -> Result<(), VMError> {
        let executed_call_frame = self.pop_call_frame()?;
        if executed_call_frame.is_create {
            self.handle_return_create(executed_call_frame, ctx_result)
        } else {
            self.handle_return_call(executed_call_frame, ctx_result)
        }
    }

    fn handle_return_call(
        &mut self,
        executed_call_frame: CallFrame,
        ctx_result: &ContextResult,
    ) -> Result<(), VMError> {
        executed_call_frame.memory.clean_from_base();

        let parent_call_frame = &mut self.current_call_frame;

        // Unused child gas comes home.
        let child_unused_gas = executed_call_frame
            .gas_limit
            .checked_sub(ctx_result.gas_used)
            .ok_or(InternalError::Underflow)?;
        parent_call_frame.return_gas(child_unused_gas)?;

        // Up to ret_size bytes of the child's return data land in memory.
        let copy_len = ctx_result.output.len().min(executed_call_frame.ret_size);
        parent_call_frame.memory.store_data(
            executed_call_frame.ret_offset,
            ctx_result.output.get(..copy_len).unwrap_or_default(),
        )?;
        parent_call_frame.sub_return_data = ctx_result.output.clone();

        match &ctx_result.result {
            TxResult::Success => parent_call_frame.stack.push(SUCCESS)?,
            TxResult::Revert(_) => parent_call_frame.stack.push(FAIL)?,
        }

        let mut stack = executed_call_frame.stack;
        stack.clear();
        self.stack_pool.push(stack);

        Ok(())
    }

    fn handle_return_create(
        &mut self,
        executed_call_frame: CallFrame,
        ctx_result: &ContextResult,
    ) -> Result<(), VMError> {
        executed_call_frame.memory.clean_from_base();

        let parent_call_frame = &mut self.current_call_frame;

        let child_unused_gas = executed_call_frame
            .gas_limit
            .checked_sub(ctx_result.gas_used)
            .ok_or(InternalError::Underflow)?;
        parent_call_frame.return_gas(child_unused_gas)?;

        match &ctx_result.result {
            TxResult::Success => {
                parent_call_frame
                    .stack
                    .push(address_to_word(executed_call_frame.to))?;
            }
            TxResult::Revert(error) => {
                // Only REVERT propagates data out of a failed create.
                if error.is_revert_opcode() {
                    parent_call_frame.sub_return_data = ctx_result.output.clone();
                }
                parent_call_frame.stack.push(FAIL)?;
            }
        }

        let mut stack = executed_call_frame.stack;
        stack.clear();
        self.stack_pool.push(stack);

        Ok(())
    }

    /// A call that fails before a child frame exists: the reserved gas is
    /// returned and the caller sees 0.
    fn early_revert_message_call(&mut self, gas_limit: u64) -> Result<OpcodeResult, VMError> {
        let callframe = &mut self.current_call_frame;
        callframe.return_gas(gas_limit)?;
        callframe.stack.push(FAIL)?;
        Ok(OpcodeResult::Continue)
    }
}
