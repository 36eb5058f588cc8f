use ethereum_types::U256;
use sha3::{Digest, Keccak256};

/// Keccak-256 of `data`, as a raw 32-byte array.
pub fn keccak_hash(data: impl AsRef<[u8]>) -> [u8; 32] {
    Keccak256::digest(data.as_ref()).into()
}

/// Interpret a big-endian byte slice as a word. Slices longer than 32 bytes
/// keep only the lowest 32.
pub fn u256_from_big_endian(bytes: &[u8]) -> U256 {
    let len = bytes.len().min(32);
    let mut padded = [0u8; 32];
    padded[32 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    U256::from_big_endian(&padded)
}

/// Interpret a fixed-size big-endian byte array as a word.
///
/// Monomorphised per `N`, so the padding loop disappears for full words.
pub fn u256_from_big_endian_const<const N: usize>(bytes: [u8; N]) -> U256 {
    const { assert!(N <= 32, "byte count out of word range") };
    let mut padded = [0u8; 32];
    padded[32 - N..].copy_from_slice(&bytes);
    U256::from_big_endian(&padded)
}

/// Big-endian byte representation of a word.
pub fn u256_to_big_endian(value: U256) -> [u8; 32] {
    value.to_big_endian()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_of_empty_input() {
        assert_eq!(
            hex::encode(keccak_hash([])),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn word_roundtrip() {
        let word = U256::from(0xdead_beef_u64);
        assert_eq!(u256_from_big_endian(&u256_to_big_endian(word)), word);
    }

    #[test]
    fn const_conversion_pads_high_bytes() {
        assert_eq!(u256_from_big_endian_const([0x12, 0x34]), U256::from(0x1234));
    }
}
