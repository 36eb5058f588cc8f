use crate::utils::keccak_hash;
use bytes::Bytes;
use ethereum_types::H256;

/// keccak256 of the empty byte string, the code hash of accounts without code.
pub const EMPTY_KECCAK_HASH: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

/// Contract bytecode together with its keccak hash.
///
/// The hash doubles as the analysis-cache key, so it must always be
/// consistent with the bytes; use [`Code::from_bytecode_unchecked`] only when
/// the hash is genuinely irrelevant (init code that is executed once).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub bytecode: Bytes,
    pub hash: H256,
}

impl Code {
    pub fn from_bytecode(bytecode: Bytes) -> Self {
        let hash = H256(keccak_hash(&bytecode));
        Self { bytecode, hash }
    }

    /// Wrap bytecode with a caller-supplied hash, skipping the keccak.
    pub fn from_bytecode_unchecked(bytecode: Bytes, hash: H256) -> Self {
        Self { bytecode, hash }
    }

    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }
}

impl Default for Code {
    fn default() -> Self {
        Self {
            bytecode: Bytes::new(),
            hash: EMPTY_KECCAK_HASH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_code_hash_matches_constant() {
        assert_eq!(Code::from_bytecode(Bytes::new()).hash, EMPTY_KECCAK_HASH);
    }
}
