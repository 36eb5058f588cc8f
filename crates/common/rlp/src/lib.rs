//! Minimal RLP encoding.
//!
//! Only the encoding direction is provided; the interpreter needs it for one
//! thing: the `keccak256(rlp([sender, nonce]))` CREATE address derivation.

pub mod encode;

pub use encode::RLPEncode;
