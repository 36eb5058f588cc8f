//! Shared primitive types for the kestrel EVM.
//!
//! Re-exports the `ethereum-types` word and hash types used everywhere in the
//! workspace, plus the small set of domain types the interpreter core needs:
//! hardfork identifiers, bytecode containers, logs and account state.

pub mod types;
pub mod utils;

pub use ethereum_types::{Address, H160, H256, U256, U512};
