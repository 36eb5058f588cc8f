use bytes::Bytes;
use kestrel_common::{Address, types::Log};
use thiserror::Error;

/// Top-level error type threaded through every handler and loop.
///
/// `RevertOpcode` is the only *reverting* failure: it refunds remaining gas
/// and carries return data. Every `ExceptionalHalt` consumes all remaining
/// gas and rolls the frame's journal snapshot back. `Internal` and
/// `Database` are programmer/backend errors that abort execution; they are
/// never observable to contracts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VMError {
    #[error("exceptional halt: {0}")]
    ExceptionalHalt(#[from] ExceptionalHalt),
    #[error("revert")]
    RevertOpcode,
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

impl VMError {
    pub fn is_revert_opcode(&self) -> bool {
        matches!(self, VMError::RevertOpcode)
    }

    /// Internal and database errors abort the whole execution instead of
    /// being reflected to the calling frame as a failed call.
    pub fn should_propagate(&self) -> bool {
        matches!(self, VMError::Internal(_) | VMError::Database(_))
    }
}

/// Exceptional failure kinds. All of them consume the frame's remaining gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExceptionalHalt {
    #[error("out of gas")]
    OutOfGas,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("invalid jump destination")]
    InvalidJump,
    #[error("invalid opcode")]
    InvalidOpcode,
    #[error("state modification in static context")]
    StateModificationInStatic,
    #[error("value transfer in static context")]
    WriteProtection,
    #[error("call depth exceeded")]
    CallDepthExceeded,
    #[error("deployed code exceeds size limit")]
    MaxCodeSizeExceeded,
    #[error("deployed code starts with the reserved 0xEF byte")]
    InvalidContractPrefix,
    #[error("offset out of bounds")]
    OutOfOffset,
    #[error("memory limit exceeded")]
    MemoryLimitExceeded,
    #[error("allocation failure")]
    OutOfMemory,
    #[error("precompile failure")]
    PrecompileFailure,
}

/// Invariant violations. Reaching one of these is a bug, not contract
/// behaviour; debug builds assert on them at the conversion points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalError {
    #[error("arithmetic overflow")]
    Overflow,
    #[error("arithmetic underflow")]
    Underflow,
    #[error("type conversion failure")]
    TypeConversion,
    #[error("call frame stack underflow")]
    EmptyCallFrameStack,
    #[error("instruction stream out of bounds")]
    InstructionOutOfBounds,
    #[error("{0}")]
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseError {
    #[error("{0}")]
    Custom(String),
}

/// Precompile outcomes that are not plain success. `OutOfGas` means the
/// forwarded allowance could not pay the up-front cost; `Failure` is a
/// malformed or unverifiable input. Both consume the whole allowance and
/// surface to the caller as `success = false` with empty output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PrecompileError {
    #[error("precompile out of gas")]
    OutOfGas,
    #[error("precompile failure")]
    Failure,
}

/// What a handler asks the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeResult {
    Continue,
    Halt,
}

/// Success or revert, as observed by the calling frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxResult {
    Success,
    Revert(VMError),
}

/// Result of one completed execution context (a frame and its subtree).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextResult {
    pub result: TxResult,
    pub gas_used: u64,
    pub output: Bytes,
}

impl ContextResult {
    pub fn is_success(&self) -> bool {
        matches!(self.result, TxResult::Success)
    }
}

/// Outcome of a whole `VM::execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub result: TxResult,
    pub gas_used: u64,
    pub gas_refunded: u64,
    pub output: Bytes,
    pub logs: Vec<Log>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        matches!(self.result, TxResult::Success)
    }
}

/// The caller-facing view of a finished call or create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub success: bool,
    pub gas_remaining: u64,
    pub output: Bytes,
    pub created_address: Option<Address>,
}

/// `execute`/`resume` either finish or suspend at a tracer pause point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmOutcome {
    Done(ExecutionReport),
    Paused,
}
