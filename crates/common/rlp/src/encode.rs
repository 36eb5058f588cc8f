use ethereum_types::H160;

/// Types that can append their RLP encoding to a buffer.
pub trait RLPEncode {
    fn encode(&self, buf: &mut Vec<u8>);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

/// Write the header for a byte string of length `len`, for strings that are
/// not a single byte below 0x80.
fn encode_string_header(len: usize, buf: &mut Vec<u8>) {
    if len < 56 {
        buf.push(0x80 + len as u8);
    } else {
        let len_bytes = to_be_trimmed(len as u64);
        buf.push(0xb7 + len_bytes.len() as u8);
        buf.extend_from_slice(&len_bytes);
    }
}

/// Write the header for a list whose encoded payload is `payload_len` bytes.
pub fn encode_list_header(payload_len: usize, buf: &mut Vec<u8>) {
    if payload_len < 56 {
        buf.push(0xc0 + payload_len as u8);
    } else {
        let len_bytes = to_be_trimmed(payload_len as u64);
        buf.push(0xf7 + len_bytes.len() as u8);
        buf.extend_from_slice(&len_bytes);
    }
}

/// Big-endian bytes of `value` with leading zeros removed; empty for zero.
fn to_be_trimmed(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|byte| *byte != 0).unwrap_or(8);
    bytes[first..].to_vec()
}

impl RLPEncode for [u8] {
    fn encode(&self, buf: &mut Vec<u8>) {
        if self.len() == 1 && self[0] < 0x80 {
            buf.push(self[0]);
        } else {
            encode_string_header(self.len(), buf);
            buf.extend_from_slice(self);
        }
    }
}

impl RLPEncode for u64 {
    fn encode(&self, buf: &mut Vec<u8>) {
        to_be_trimmed(*self).as_slice().encode(buf);
    }
}

impl RLPEncode for H160 {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.as_bytes().encode(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_small_scalars_as_single_bytes() {
        assert_eq!(0u64.encode_to_vec(), vec![0x80]);
        assert_eq!(15u64.encode_to_vec(), vec![0x0f]);
        assert_eq!(1024u64.encode_to_vec(), vec![0x82, 0x04, 0x00]);
    }

    #[test]
    fn encodes_address_as_20_byte_string() {
        let address = H160::from_low_u64_be(0x42);
        let encoded = address.encode_to_vec();
        assert_eq!(encoded.len(), 21);
        assert_eq!(encoded[0], 0x80 + 20);
    }

    #[test]
    fn sender_nonce_list_matches_known_create_preimage() {
        // rlp([0x00..0x01 (20 bytes), 0]) for a fresh deployer at nonce 0.
        let address = H160::from_low_u64_be(1);
        let mut payload = Vec::new();
        address.encode(&mut payload);
        0u64.encode(&mut payload);

        let mut encoded = Vec::new();
        encode_list_header(payload.len(), &mut encoded);
        encoded.extend_from_slice(&payload);

        assert_eq!(hex::encode(&encoded), "d6940000000000000000000000000000000000000180");
    }
}
