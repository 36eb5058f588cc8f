use crate::{
    errors::{OpcodeResult, VMError},
    opcode_handlers::arithmetic::is_negative,
    vm::VM,
};
use kestrel_common::U256;

// Comparison & Bitwise Logic Operations (14)
// Opcodes: LT, GT, SLT, SGT, EQ, ISZERO, AND, OR, XOR, NOT, BYTE, SHL, SHR, SAR

impl VM {
    // LT operation
    #[inline]
    pub fn op_lt(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [lho, rho] = stack.pop()?;
        stack.push(U256::from(u8::from(lho < rho)))?;
        Ok(OpcodeResult::Continue)
    }

    // GT operation
    #[inline]
    pub fn op_gt(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [lho, rho] = stack.pop()?;
        stack.push(U256::from(u8::from(lho > rho)))?;
        Ok(OpcodeResult::Continue)
    }

    // SLT operation
    pub fn op_slt(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [lho, rho] = stack.pop()?;
        // Different signs decide immediately; same-sign two's-complement
        // patterns order like their unsigned values.
        let result = if is_negative(lho) != is_negative(rho) {
            is_negative(lho)
        } else {
            lho < rho
        };
        stack.push(U256::from(u8::from(result)))?;
        Ok(OpcodeResult::Continue)
    }

    // SGT operation
    pub fn op_sgt(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [lho, rho] = stack.pop()?;
        let result = if is_negative(lho) != is_negative(rho) {
            is_negative(rho)
        } else {
            lho > rho
        };
        stack.push(U256::from(u8::from(result)))?;
        Ok(OpcodeResult::Continue)
    }

    // EQ operation
    #[inline]
    pub fn op_eq(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [lho, rho] = stack.pop()?;
        stack.push(U256::from(u8::from(lho == rho)))?;
        Ok(OpcodeResult::Continue)
    }

    // ISZERO operation
    #[inline]
    pub fn op_iszero(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let value = stack.pop1()?;
        stack.push(U256::from(u8::from(value.is_zero())))?;
        Ok(OpcodeResult::Continue)
    }

    // AND operation
    #[inline]
    pub fn op_and(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [lho, rho] = stack.pop()?;
        stack.push(lho & rho)?;
        Ok(OpcodeResult::Continue)
    }

    // OR operation
    #[inline]
    pub fn op_or(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [lho, rho] = stack.pop()?;
        stack.push(lho | rho)?;
        Ok(OpcodeResult::Continue)
    }

    // XOR operation
    #[inline]
    pub fn op_xor(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [lho, rho] = stack.pop()?;
        stack.push(lho ^ rho)?;
        Ok(OpcodeResult::Continue)
    }

    // NOT operation
    #[inline]
    pub fn op_not(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let value = stack.pop1()?;
        stack.push(!value)?;
        Ok(OpcodeResult::Continue)
    }

    // BYTE operation
    pub fn op_byte(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [index, value] = stack.pop()?;

        // Index 0 is the most significant byte.
        if index >= U256::from(32) {
            stack.push_zero()?;
            return Ok(OpcodeResult::Continue);
        }
        #[expect(clippy::arithmetic_side_effects, reason = "index is below 32")]
        let shift = (31 - index.low_u64()) * 8;
        stack.push((value >> shift) & U256::from(0xFF))?;

        Ok(OpcodeResult::Continue)
    }

    // SHL operation (EIP-145)
    pub fn op_shl(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [shift, value] = stack.pop()?;
        if shift >= U256::from(256) {
            stack.push_zero()?;
        } else {
            stack.push(value << shift)?;
        }
        Ok(OpcodeResult::Continue)
    }

    // SHR operation (EIP-145)
    pub fn op_shr(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [shift, value] = stack.pop()?;
        if shift >= U256::from(256) {
            stack.push_zero()?;
        } else {
            stack.push(value >> shift)?;
        }
        Ok(OpcodeResult::Continue)
    }

    // SAR operation (EIP-145)
    pub fn op_sar(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [shift, value] = stack.pop()?;

        let negative = is_negative(value);
        let result = if shift >= U256::from(256) {
            if negative { U256::MAX } else { U256::zero() }
        } else if negative {
            // Logical shift, then fill the vacated high bits with ones.
            let shifted = value >> shift;
            if shift.is_zero() {
                shifted
            } else {
                shifted | !(U256::MAX >> shift)
            }
        } else {
            value >> shift
        };
        stack.push(result)?;

        Ok(OpcodeResult::Continue)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::super::arithmetic::negate;
    use kestrel_common::U256;

    #[test]
    fn signed_comparison_orders_across_zero() {
        // -1 < 1 and 1 > -1 in signed terms, the opposite of unsigned.
        let minus_one = negate(U256::one());
        assert!(minus_one > U256::one());

        let signed_less = if super::is_negative(minus_one) != super::is_negative(U256::one()) {
            super::is_negative(minus_one)
        } else {
            minus_one < U256::one()
        };
        assert!(signed_less);
    }

    #[test]
    fn sar_fills_sign_bits() {
        let minus_eight = negate(U256::from(8));
        // -8 >> 1 == -4 arithmetically.
        let shifted = (minus_eight >> 1u64) | !(U256::MAX >> 1u64);
        assert_eq!(shifted, negate(U256::from(4)));
    }
}
