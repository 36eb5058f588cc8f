mod account;
mod code;
mod fork;
mod log;

pub use account::AccountState;
pub use code::{Code, EMPTY_KECCAK_HASH};
pub use fork::Fork;
pub use log::Log;
