use crate::{
    errors::{OpcodeResult, VMError},
    gas_cost,
    gas_schedule::GasSchedule,
    vm::VM,
};
use kestrel_common::{U256, U512};

// Arithmetic Operations (11)
// Opcodes: ADD, SUB, MUL, DIV, SDIV, MOD, SMOD, ADDMOD, MULMOD, EXP, SIGNEXTEND

impl VM {
    // ADD operation
    #[inline]
    pub fn op_add(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [augend, addend] = stack.pop()?;
        stack.push(augend.overflowing_add(addend).0)?;
        Ok(OpcodeResult::Continue)
    }

    // SUB operation
    #[inline]
    pub fn op_sub(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [minuend, subtrahend] = stack.pop()?;
        stack.push(minuend.overflowing_sub(subtrahend).0)?;
        Ok(OpcodeResult::Continue)
    }

    // MUL operation
    #[inline]
    pub fn op_mul(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [multiplicand, multiplier] = stack.pop()?;
        stack.push(multiplicand.overflowing_mul(multiplier).0)?;
        Ok(OpcodeResult::Continue)
    }

    // DIV operation
    pub fn op_div(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [dividend, divisor] = stack.pop()?;
        match dividend.checked_div(divisor) {
            Some(quotient) => stack.push(quotient)?,
            None => stack.push_zero()?,
        }
        Ok(OpcodeResult::Continue)
    }

    // SDIV operation
    pub fn op_sdiv(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [dividend, divisor] = stack.pop()?;
        if divisor.is_zero() || dividend.is_zero() {
            stack.push_zero()?;
            return Ok(OpcodeResult::Continue);
        }

        let quotient = match abs(dividend).checked_div(abs(divisor)) {
            Some(quotient) => {
                if is_negative(dividend) ^ is_negative(divisor) {
                    negate(quotient)
                } else {
                    quotient
                }
            }
            None => U256::zero(),
        };
        stack.push(quotient)?;

        Ok(OpcodeResult::Continue)
    }

    // MOD operation
    pub fn op_mod(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [dividend, divisor] = stack.pop()?;
        stack.push(dividend.checked_rem(divisor).unwrap_or_default())?;
        Ok(OpcodeResult::Continue)
    }

    // SMOD operation
    pub fn op_smod(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [dividend, divisor] = stack.pop()?;
        if divisor.is_zero() || dividend.is_zero() {
            stack.push_zero()?;
            return Ok(OpcodeResult::Continue);
        }

        let remainder = match abs(dividend).checked_rem(abs(divisor)) {
            Some(remainder) if is_negative(dividend) => negate(remainder),
            Some(remainder) => remainder,
            None => U256::zero(),
        };
        stack.push(remainder)?;

        Ok(OpcodeResult::Continue)
    }

    // ADDMOD operation
    pub fn op_addmod(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [augend, addend, modulus] = stack.pop()?;
        if modulus.is_zero() {
            stack.push_zero()?;
            return Ok(OpcodeResult::Continue);
        }

        let augend: U512 = augend.into();
        let addend: U512 = addend.into();
        #[expect(clippy::arithmetic_side_effects, reason = "two words always fit a double word")]
        let sum = augend + addend;
        #[expect(clippy::arithmetic_side_effects, reason = "modulus is nonzero")]
        let sum_mod = sum % modulus;

        // Reduced below a word-sized modulus, so the conversion holds.
        let sum_mod = U256::try_from(sum_mod).unwrap_or_default();
        stack.push(sum_mod)?;

        Ok(OpcodeResult::Continue)
    }

    // MULMOD operation
    pub fn op_mulmod(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [multiplicand, multiplier, modulus] = stack.pop()?;
        if modulus.is_zero() || multiplicand.is_zero() || multiplier.is_zero() {
            stack.push_zero()?;
            return Ok(OpcodeResult::Continue);
        }

        let product = multiplicand.full_mul(multiplier);
        #[expect(clippy::arithmetic_side_effects, reason = "modulus is nonzero")]
        let product_mod = product % modulus;

        let product_mod = U256::try_from(product_mod).unwrap_or_default();
        stack.push(product_mod)?;

        Ok(OpcodeResult::Continue)
    }

    // EXP operation
    pub fn op_exp(&mut self) -> Result<OpcodeResult, VMError> {
        let schedule = GasSchedule::for_fork(self.env.config.fork);
        let current_call_frame = &mut self.current_call_frame;
        let [base, exponent] = current_call_frame.stack.pop()?;

        current_call_frame.increase_consumed_gas(gas_cost::exp_dynamic(exponent, schedule)?)?;

        current_call_frame
            .stack
            .push(base.overflowing_pow(exponent).0)?;

        Ok(OpcodeResult::Continue)
    }

    // SIGNEXTEND operation
    pub fn op_signextend(&mut self) -> Result<OpcodeResult, VMError> {
        let stack = &mut self.current_call_frame.stack;
        let [byte_size_minus_one, value_to_extend] = stack.pop()?;

        if byte_size_minus_one > U256::from(31) {
            stack.push(value_to_extend)?;
            return Ok(OpcodeResult::Continue);
        }

        #[expect(
            clippy::arithmetic_side_effects,
            reason = "byte_size_minus_one is at most 31, so the index is at most 255"
        )]
        {
            let sign_bit_index = byte_size_minus_one * 8 + 7;
            let sign_bit = (value_to_extend >> sign_bit_index) & U256::one();
            let mask = (U256::one() << sign_bit_index) - U256::one();

            let result = if sign_bit.is_zero() {
                value_to_extend & mask
            } else {
                value_to_extend | !mask
            };
            stack.push(result)?;
        }

        Ok(OpcodeResult::Continue)
    }
}

/// True when the most significant bit is set (two's-complement negative).
pub(crate) fn is_negative(value: U256) -> bool {
    value.bit(255)
}

/// Two's-complement negation.
pub(crate) fn negate(value: U256) -> U256 {
    (!value).overflowing_add(U256::one()).0
}

pub(crate) fn abs(value: U256) -> U256 {
    if is_negative(value) { negate(value) } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negate_is_twos_complement() {
        assert_eq!(negate(U256::one()), U256::MAX);
        assert_eq!(negate(U256::MAX), U256::one());
        assert_eq!(negate(U256::zero()), U256::zero());
    }

    #[test]
    fn abs_of_minus_two() {
        let minus_two = negate(U256::from(2));
        assert!(is_negative(minus_two));
        assert_eq!(abs(minus_two), U256::from(2));
    }
}
