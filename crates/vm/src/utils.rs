use crate::errors::{ExceptionalHalt, VMError};
use kestrel_common::{
    Address, H256, U256,
    utils::{keccak_hash, u256_to_big_endian},
};
use kestrel_rlp::encode::{RLPEncode, encode_list_header};

/// Low 20 bytes of a word, as an address.
pub fn word_to_address(word: U256) -> Address {
    let bytes = u256_to_big_endian(word);
    Address::from_slice(bytes.get(12..).unwrap_or_default())
}

/// Zero-extend an address into a word.
pub fn address_to_word(address: Address) -> U256 {
    let mut padded = [0u8; 32];
    if let Some(target) = padded.get_mut(12..) {
        target.copy_from_slice(address.as_bytes());
    }
    U256::from_big_endian(&padded)
}

/// Word → usize for offsets/sizes; anything that does not fit cannot be a
/// valid memory position.
pub fn u256_to_usize(value: U256) -> Result<usize, ExceptionalHalt> {
    usize::try_from(value).map_err(|_| ExceptionalHalt::OutOfOffset)
}

/// Convert a (size, offset) operand pair. A zero size makes the offset
/// irrelevant, so it is not range-checked in that case.
pub fn size_offset_to_usize(size: U256, offset: U256) -> Result<(usize, usize), VMError> {
    if size.is_zero() {
        return Ok((0, 0));
    }
    Ok((u256_to_usize(size)?, u256_to_usize(offset)?))
}

/// CREATE address: `keccak256(rlp([sender, nonce]))[12..]`.
pub fn calculate_create_address(sender: Address, nonce: u64) -> Address {
    let mut payload = Vec::new();
    sender.encode(&mut payload);
    nonce.encode(&mut payload);

    let mut encoded = Vec::with_capacity(payload.len().saturating_add(2));
    encode_list_header(payload.len(), &mut encoded);
    encoded.extend_from_slice(&payload);

    let hash = keccak_hash(&encoded);
    Address::from_slice(hash.get(12..).unwrap_or_default())
}

/// CREATE2 address:
/// `keccak256(0xFF ‖ sender ‖ salt ‖ keccak256(init_code))[12..]`.
pub fn calculate_create2_address(sender: Address, init_code: &[u8], salt: U256) -> Address {
    let mut preimage = Vec::with_capacity(85);
    preimage.push(0xFF);
    preimage.extend_from_slice(sender.as_bytes());
    preimage.extend_from_slice(&u256_to_big_endian(salt));
    preimage.extend_from_slice(&keccak_hash(init_code));

    let hash = keccak_hash(&preimage);
    Address::from_slice(hash.get(12..).unwrap_or_default())
}

/// H256 view of a storage key word.
pub fn u256_to_h256(value: U256) -> H256 {
    H256(u256_to_big_endian(value))
}

/// Word view of a 32-byte hash.
pub fn h256_to_u256(value: H256) -> U256 {
    U256::from_big_endian(value.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_word_roundtrip() {
        let address = Address::from_slice(&[0xAB; 20]);
        assert_eq!(word_to_address(address_to_word(address)), address);
    }

    #[test]
    fn create_address_is_deterministic_and_nonce_sensitive(){
        let sender = Address::from_low_u64_be(0xC0FFEE);
        let first = calculate_create_address(sender, 0);
        assert_eq!(first, calculate_create_address(sender, 0));
        assert_ne!(first, calculate_create_address(sender, 1));
    }

    #[test]
    fn create2_address_matches_known_vector() {
        // EIP-1014 example 1: sender 0x00..00, salt 0, init code 0x00.
        let derived =
            calculate_create2_address(Address::zero(), &[0x00], U256::zero());
        assert_eq!(
            hex::encode(derived.as_bytes()),
            "4d1a2e2bb4f88f0250f26ffff098b0b30b26bf38"
        );
    }

    #[test]
    fn create2_is_pure_in_its_inputs() {
        let sender = Address::from_low_u64_be(7);
        let init = [0x60, 0x00, 0x60, 0x00, 0xF3];
        let salt = U256::from(42);
        assert_eq!(
            calculate_create2_address(sender, &init, salt),
            calculate_create2_address(sender, &init, salt)
        );
        assert_ne!(
            calculate_create2_address(sender, &init, salt),
            calculate_create2_address(sender, &init, U256::from(43))
        );
    }
}
