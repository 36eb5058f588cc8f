//! # kestrel-evm
//!
//! An analysis-based Ethereum Virtual Machine interpreter.
//!
//! ## Overview
//!
//! Bytecode is pre-analysed into a stream of instructions grouped into basic
//! blocks; gas and stack limits are validated once per block instead of once
//! per opcode, PUSH immediates are decoded ahead of time, and jump targets
//! are resolved through a per-code bitset. A second, deliberately simple
//! interpreter walks the raw bytecode by program counter using the same
//! opcode handlers; the shadow comparator runs both and diffs the results.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            VM                                │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │  CallFrame  │  │ CodeAnalysis │  │   DispatchTable     │  │
//! │  └─────────────┘  └──────────────┘  └─────────────────────┘  │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │   Memory    │  │    Stack     │  │  Tracer / Shadow    │  │
//! │  └─────────────┘  └──────────────┘  └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Host (journal + cache)                   │
//! │                 over a pluggable Database backend            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key components
//!
//! - [`vm::VM`]: execution engine and call/create plumbing
//! - [`analysis::CodeAnalysis`]: per-contract pre-analysis, cached by code hash
//! - [`dispatch::DispatchTable`]: per-hardfork opcode metadata, struct-of-arrays
//! - [`host::Host`]: journaled world-state view over a [`db::Database`]
//! - [`journal::Journal`]: append-only log of reversible state deltas
//! - [`mini`]: the PC-walk reference interpreter
//! - [`shadow`]: differential comparison between the two interpreters
//! - [`tracer`]: optional per-instruction observer with pause/stop controls
//!
//! ## Supported forks
//!
//! Frontier through Cancun; the fork selects the dispatch table and the gas
//! schedule.

pub mod analysis;
pub mod call_frame;
pub mod constants;
pub mod db;
pub mod dispatch;
pub mod environment;
pub mod errors;
pub mod execution_handlers;
pub mod gas_cost;
pub mod gas_schedule;
pub mod host;
pub mod interpreter;
pub mod journal;
pub mod memory;
pub mod mini;
pub mod opcode_handlers;
pub mod opcodes;
pub mod precompiles;
pub mod shadow;
pub mod tracer;
pub mod utils;
pub mod vm;

pub use environment::*;
pub use errors::{CallResult, ExecutionReport, VmOutcome};
pub use vm::{CallParams, VM};
