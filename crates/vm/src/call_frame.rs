use crate::{
    analysis::CodeAnalysis,
    constants::STACK_LIMIT,
    errors::{ExceptionalHalt, VMError},
    memory::Memory,
};
use bytes::Bytes;
use kestrel_common::{Address, U256, types::Code};
use std::rc::Rc;

/// The operand stack: 1024 word slots, grown upward.
///
/// Popped slots are zeroed before reuse so stale operands can never leak
/// into later reads through an implementation bug.
#[derive(Debug, Clone)]
pub struct Stack {
    values: Box<[U256]>,
    len: usize,
}

impl Stack {
    /// Pop `N` operands, top of stack first.
    pub fn pop<const N: usize>(&mut self) -> Result<[U256; N], ExceptionalHalt> {
        if self.len < N {
            return Err(ExceptionalHalt::StackUnderflow);
        }

        let mut out = [U256::zero(); N];
        for (i, slot) in out.iter_mut().enumerate() {
            // len > i for all i < N, checked above.
            let index = self.len.wrapping_sub(1).wrapping_sub(i);
            if let Some(value) = self.values.get_mut(index) {
                *slot = std::mem::take(value);
            }
        }
        self.len = self.len.wrapping_sub(N);
        Ok(out)
    }

    pub fn pop1(&mut self) -> Result<U256, ExceptionalHalt> {
        let [value] = self.pop()?;
        Ok(value)
    }

    pub fn push(&mut self, value: U256) -> Result<(), ExceptionalHalt> {
        let slot = self
            .values
            .get_mut(self.len)
            .ok_or(ExceptionalHalt::StackOverflow)?;
        *slot = value;
        self.len = self.len.wrapping_add(1);
        Ok(())
    }

    pub fn push_zero(&mut self) -> Result<(), ExceptionalHalt> {
        self.push(U256::zero())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        if let Some(used) = self.values.get_mut(..self.len) {
            used.fill(U256::zero());
        }
        self.len = 0;
    }

    /// Read the operand `depth` slots below the top without popping.
    pub fn peek(&self, depth: usize) -> Result<U256, ExceptionalHalt> {
        if depth >= self.len {
            return Err(ExceptionalHalt::StackUnderflow);
        }
        self.values
            .get(self.len.wrapping_sub(1).wrapping_sub(depth))
            .copied()
            .ok_or(ExceptionalHalt::StackUnderflow)
    }

    /// DUP1..DUP16: re-push the operand `depth` slots below the top.
    pub fn dup(&mut self, depth: usize) -> Result<(), ExceptionalHalt> {
        let value = self.peek(depth)?;
        self.push(value)
    }

    /// SWAP1..SWAP16: exchange the top with the operand `depth` slots below.
    pub fn swap(&mut self, depth: usize) -> Result<(), ExceptionalHalt> {
        if depth >= self.len {
            return Err(ExceptionalHalt::StackUnderflow);
        }
        let top = self.len.wrapping_sub(1);
        self.values.swap(top, top.wrapping_sub(depth));
        Ok(())
    }

    /// Up to `n` operands from the top, for tracer/shadow snapshots.
    pub fn top_slice(&self, n: usize) -> Vec<U256> {
        (0..n.min(self.len))
            .filter_map(|depth| self.peek(depth).ok())
            .collect()
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self {
            values: vec![U256::zero(); STACK_LIMIT].into_boxed_slice(),
            len: 0,
        }
    }
}

/// Per-call execution context.
///
/// Frames are created on CALL/CREATE entry and die on return. A child frame
/// borrows the call tree's memory buffer through its own checkpointed view
/// and gets a (pooled) operand stack of its own.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub msg_sender: Address,
    /// The account whose storage and balance this frame touches.
    pub to: Address,
    /// The account whose code runs; differs from `to` for CALLCODE and
    /// DELEGATECALL.
    pub code_address: Address,
    pub bytecode: Code,
    pub analysis: Rc<CodeAnalysis>,
    pub msg_value: U256,
    pub calldata: Bytes,
    pub is_static: bool,
    pub gas_limit: u64,
    /// Signed so a transient overdraft shows up as a negative value instead
    /// of wrapping; observable gas is always clamped at zero.
    pub gas_remaining: i64,
    pub depth: usize,
    pub should_transfer_value: bool,
    pub is_create: bool,
    /// Return-data window in the parent's memory.
    pub ret_offset: usize,
    pub ret_size: usize,
    pub stack: Stack,
    pub memory: Memory,
    /// Return data of the most recent completed sub-call.
    pub sub_return_data: Bytes,
    /// This frame's own return data, set by RETURN/REVERT.
    pub output: Bytes,
    /// Instruction index into the analysis stream (main interpreter).
    pub ip: usize,
    /// Byte offset into the bytecode (reference interpreter).
    pub pc: usize,
    /// Journal snapshot taken at frame entry.
    pub snapshot: usize,
}

impl CallFrame {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        msg_sender: Address,
        to: Address,
        code_address: Address,
        bytecode: Code,
        analysis: Rc<CodeAnalysis>,
        msg_value: U256,
        calldata: Bytes,
        is_static: bool,
        gas_limit: u64,
        depth: usize,
        should_transfer_value: bool,
        is_create: bool,
        ret_offset: usize,
        ret_size: usize,
        stack: Stack,
        memory: Memory,
    ) -> Self {
        Self {
            msg_sender,
            to,
            code_address,
            bytecode,
            analysis,
            msg_value,
            calldata,
            is_static,
            gas_limit,
            gas_remaining: i64::try_from(gas_limit).unwrap_or(i64::MAX),
            depth,
            should_transfer_value,
            is_create,
            ret_offset,
            ret_size,
            stack,
            memory,
            sub_return_data: Bytes::new(),
            output: Bytes::new(),
            ip: 0,
            pc: 0,
            snapshot: 0,
        }
    }

    /// Charge `gas`, failing with `OutOfGas` when the frame cannot pay.
    #[inline]
    pub fn increase_consumed_gas(&mut self, gas: u64) -> Result<(), VMError> {
        let gas = i64::try_from(gas).map_err(|_| ExceptionalHalt::OutOfGas)?;
        let remaining = self
            .gas_remaining
            .checked_sub(gas)
            .ok_or(ExceptionalHalt::OutOfGas)?;
        if remaining < 0 {
            return Err(ExceptionalHalt::OutOfGas.into());
        }
        self.gas_remaining = remaining;
        Ok(())
    }

    /// Hand unused child gas back to this frame.
    #[inline]
    pub fn return_gas(&mut self, gas: u64) -> Result<(), VMError> {
        let gas = i64::try_from(gas).map_err(|_| crate::errors::InternalError::Overflow)?;
        self.gas_remaining = self
            .gas_remaining
            .checked_add(gas)
            .ok_or(crate::errors::InternalError::Overflow)?;
        Ok(())
    }

    /// Gas left, clamped at zero for reporting.
    #[inline]
    pub fn gas_remaining_clamped(&self) -> u64 {
        u64::try_from(self.gas_remaining.max(0)).unwrap_or(0)
    }

    /// Gas consumed so far, for reports.
    pub fn gas_used(&self) -> u64 {
        self.gas_limit.saturating_sub(self.gas_remaining_clamped())
    }

    /// The byte under the program counter; running off the end of code is an
    /// implicit STOP.
    #[inline]
    pub fn next_opcode(&self) -> u8 {
        self.bytecode
            .bytecode
            .get(self.pc)
            .copied()
            .unwrap_or(u8::from(crate::opcodes::Opcode::STOP))
    }

    /// Resolve a dynamic jump destination and move both cursors there.
    pub fn jump_to(&mut self, destination: U256) -> Result<(), VMError> {
        let (pc, ip) = self
            .analysis
            .jump_target(destination)
            .ok_or(ExceptionalHalt::InvalidJump)?;
        self.pc = pc;
        self.ip = ip;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn pop_returns_top_first_and_zeroes_slots() {
        let mut stack = Stack::default();
        stack.push(U256::from(1)).unwrap();
        stack.push(U256::from(2)).unwrap();
        let [top, below] = stack.pop().unwrap();
        assert_eq!(top, U256::from(2));
        assert_eq!(below, U256::from(1));
        assert!(stack.is_empty());
    }

    #[test]
    fn overflow_at_limit() {
        let mut stack = Stack::default();
        for i in 0..STACK_LIMIT {
            stack.push(U256::from(i)).unwrap();
        }
        assert_eq!(stack.push(U256::zero()), Err(ExceptionalHalt::StackOverflow));
    }

    #[test]
    fn underflow_on_empty() {
        let mut stack = Stack::default();
        assert_eq!(stack.pop1(), Err(ExceptionalHalt::StackUnderflow));
    }

    #[test]
    fn dup_and_swap() {
        let mut stack = Stack::default();
        stack.push(U256::from(10)).unwrap();
        stack.push(U256::from(20)).unwrap();

        stack.dup(1).unwrap(); // DUP2
        assert_eq!(stack.peek(0).unwrap(), U256::from(10));

        stack.swap(2).unwrap(); // SWAP2 with [10, 20, 10]
        assert_eq!(stack.peek(0).unwrap(), U256::from(10));
        assert_eq!(stack.peek(2).unwrap(), U256::from(10));
        assert_eq!(stack.peek(1).unwrap(), U256::from(20));
    }

    #[test]
    fn stack_size_stays_in_bounds() {
        let mut stack = Stack::default();
        stack.push(U256::from(1)).unwrap();
        stack.push(U256::from(2)).unwrap();
        stack.pop1().unwrap();
        assert!(stack.len() <= STACK_LIMIT);
        assert_eq!(stack.len(), 1);
    }
}
