use crate::{
    errors::{OpcodeResult, VMError},
    vm::VM,
};
use kestrel_common::{U256, utils::u256_from_big_endian};

// Push Operations
// Opcodes: PUSH0, PUSH1 ... PUSH32

impl VM {
    // Generic PUSH operation, monomorphised per immediate width.
    //
    // The analysis stream never dispatches here (immediates are
    // pre-decoded); this is the reference loop's path, and it applies the
    // same zero-padding to a truncated trailing immediate.
    #[inline]
    pub fn op_push<const N: usize>(&mut self) -> Result<OpcodeResult, VMError> {
        let call_frame = &mut self.current_call_frame;
        let code = &call_frame.bytecode.bytecode;

        let mut buffer = [0u8; N];
        let available = code.len().saturating_sub(call_frame.pc).min(N);
        if let (Some(target), Some(source)) = (
            buffer.get_mut(..available),
            code.get(call_frame.pc..call_frame.pc.saturating_add(available)),
        ) {
            target.copy_from_slice(source);
        }
        call_frame.stack.push(u256_from_big_endian(&buffer))?;

        // Skip the immediate bytes.
        call_frame.pc = call_frame.pc.saturating_add(N);

        Ok(OpcodeResult::Continue)
    }

    // PUSH0 (EIP-3855)
    #[inline]
    pub fn op_push0(&mut self) -> Result<OpcodeResult, VMError> {
        self.current_call_frame.stack.push(U256::zero())?;
        Ok(OpcodeResult::Continue)
    }
}
