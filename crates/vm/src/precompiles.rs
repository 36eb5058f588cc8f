//! Precompiled contracts: dispatch, gas, and fixed-contract execution.
//!
//! Addresses 0x01..0x0A are pre-installed. Gas is charged up front from the
//! forwarded allowance; an allowance that cannot pay is an exceptional
//! failure that consumes all of it. ECRECOVER is the one precompile whose
//! "failure" (an unrecoverable signature) is a *successful* call with empty
//! output.

use crate::{constants::VERSIONED_HASH_VERSION_KZG, errors::PrecompileError};
use bytes::Bytes;
use kestrel_common::{Address, U256, types::Fork, utils::u256_to_big_endian};
use malachite::{
    Natural,
    base::num::{arithmetic::traits::ModPow, conversion::traits::PowerOf2Digits},
};
use sha2::{Digest, Sha256};

const ECRECOVER_COST: u64 = 3000;
const SHA256_STATIC: u64 = 60;
const SHA256_WORD: u64 = 12;
const RIPEMD160_STATIC: u64 = 600;
const RIPEMD160_WORD: u64 = 120;
const IDENTITY_STATIC: u64 = 15;
const IDENTITY_WORD: u64 = 3;
const MODEXP_MIN_COST: u64 = 200;
const ECADD_COST_BYZANTIUM: u64 = 500;
const ECADD_COST_ISTANBUL: u64 = 150;
const ECMUL_COST_BYZANTIUM: u64 = 40000;
const ECMUL_COST_ISTANBUL: u64 = 6000;
const ECPAIRING_STATIC_BYZANTIUM: u64 = 100_000;
const ECPAIRING_PAIR_BYZANTIUM: u64 = 80_000;
const ECPAIRING_STATIC_ISTANBUL: u64 = 45_000;
const ECPAIRING_PAIR_ISTANBUL: u64 = 34_000;
const BLAKE2F_ROUND_COST: u64 = 1;
const POINT_EVALUATION_COST: u64 = 50_000;

/// Field elements per blob, first half of the point-evaluation output.
const FIELD_ELEMENTS_PER_BLOB: u64 = 4096;
/// BLS12-381 scalar field modulus, second half of the output.
const BLS_MODULUS_BYTES: [u8; 32] = [
    0x73, 0xed, 0xa7, 0x53, 0x29, 0x9d, 0x7d, 0x48, 0x33, 0x39, 0xd8, 0x08, 0x09, 0xa1, 0xd8, 0x05,
    0x53, 0xbd, 0xa4, 0x02, 0xff, 0xfe, 0x5b, 0xfe, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x01,
];

/// Highest installed precompile address per fork era.
pub const SIZE_PRECOMPILES_PRE_BYZANTIUM: u64 = 4;
pub const SIZE_PRECOMPILES_PRE_ISTANBUL: u64 = 8;
pub const SIZE_PRECOMPILES_PRE_CANCUN: u64 = 9;
pub const SIZE_PRECOMPILES_CANCUN: u64 = 10;

pub fn precompile_count(fork: Fork) -> u64 {
    if fork >= Fork::Cancun {
        SIZE_PRECOMPILES_CANCUN
    } else if fork >= Fork::Istanbul {
        SIZE_PRECOMPILES_PRE_CANCUN
    } else if fork >= Fork::Byzantium {
        SIZE_PRECOMPILES_PRE_ISTANBUL
    } else {
        SIZE_PRECOMPILES_PRE_BYZANTIUM
    }
}

/// Whether `address` hosts a precompile under `fork`.
pub fn is_precompile(address: &Address, fork: Fork) -> bool {
    let bytes = address.as_bytes();
    if bytes.get(..12).is_none_or(|prefix| prefix.iter().any(|byte| *byte != 0)) {
        return false;
    }
    let number = address.to_low_u64_be();
    number >= 1 && number <= precompile_count(fork)
}

/// Charge `cost` against the precompile's forwarded allowance.
pub(crate) fn increase_precompile_consumed_gas(
    cost: u64,
    gas_remaining: &mut u64,
) -> Result<(), PrecompileError> {
    if cost > *gas_remaining {
        return Err(PrecompileError::OutOfGas);
    }
    *gas_remaining = gas_remaining.wrapping_sub(cost);
    Ok(())
}

/// Run the precompile installed at `address`.
pub fn execute_precompile(
    address: Address,
    calldata: &Bytes,
    gas_remaining: &mut u64,
    fork: Fork,
) -> Result<Bytes, PrecompileError> {
    match address.to_low_u64_be() {
        1 => ecrecover(calldata, gas_remaining),
        2 => sha256(calldata, gas_remaining),
        3 => ripemd160(calldata, gas_remaining),
        4 => identity(calldata, gas_remaining),
        5 => modexp(calldata, gas_remaining, fork),
        6 => ecadd(calldata, gas_remaining, fork),
        7 => ecmul(calldata, gas_remaining, fork),
        8 => ecpairing(calldata, gas_remaining, fork),
        9 => blake2f(calldata, gas_remaining),
        10 => point_evaluation(calldata, gas_remaining),
        _ => Err(PrecompileError::Failure),
    }
}

fn per_word_cost(static_cost: u64, word_cost: u64, len: usize) -> u64 {
    let words = u64::try_from(len).unwrap_or(u64::MAX).div_ceil(32);
    static_cost.saturating_add(words.saturating_mul(word_cost))
}

/// Right-pad `input` with zeroes to `len` bytes.
fn padded(input: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let take = input.len().min(len);
    if let (Some(target), Some(source)) = (out.get_mut(..take), input.get(..take)) {
        target.copy_from_slice(source);
    }
    out
}

fn read_word(input: &[u8], offset: usize) -> U256 {
    let mut buffer = [0u8; 32];
    for (i, slot) in buffer.iter_mut().enumerate() {
        *slot = input
            .get(offset.saturating_add(i))
            .copied()
            .unwrap_or_default();
    }
    U256::from_big_endian(&buffer)
}

// ----- 0x01 ECRECOVER -----

fn ecrecover(calldata: &Bytes, gas_remaining: &mut u64) -> Result<Bytes, PrecompileError> {
    increase_precompile_consumed_gas(ECRECOVER_COST, gas_remaining)?;

    let input = padded(calldata, 128);
    let hash = read_word(&input, 0);
    let v = read_word(&input, 32);

    // Only 27 and 28 are valid; anything else recovers nothing.
    if v != U256::from(27) && v != U256::from(28) {
        return Ok(Bytes::new());
    }

    let Some(signature_bytes) = input.get(64..128) else {
        return Ok(Bytes::new());
    };
    let Ok(mut signature) = k256::ecdsa::Signature::from_slice(signature_bytes) else {
        return Ok(Bytes::new());
    };
    let mut recovery_byte = u8::from(v == U256::from(28));
    // The precompile accepts high-s signatures; k256 wants them normalised.
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_byte ^= 1;
    }
    let Some(recovery_id) = k256::ecdsa::RecoveryId::from_byte(recovery_byte) else {
        return Ok(Bytes::new());
    };

    let prehash = u256_to_big_endian(hash);
    let Ok(public) =
        k256::ecdsa::VerifyingKey::recover_from_prehash(&prehash, &signature, recovery_id)
    else {
        return Ok(Bytes::new());
    };

    let uncompressed = public.to_encoded_point(false);
    let Some(xy) = uncompressed.as_bytes().get(1..65) else {
        return Ok(Bytes::new());
    };
    let address_hash = kestrel_common::utils::keccak_hash(xy);

    let mut output = [0u8; 32];
    if let (Some(target), Some(source)) = (output.get_mut(12..), address_hash.get(12..)) {
        target.copy_from_slice(source);
    }
    Ok(Bytes::copy_from_slice(&output))
}

// ----- 0x02 SHA256 / 0x03 RIPEMD160 / 0x04 IDENTITY -----

fn sha256(calldata: &Bytes, gas_remaining: &mut u64) -> Result<Bytes, PrecompileError> {
    let cost = per_word_cost(SHA256_STATIC, SHA256_WORD, calldata.len());
    increase_precompile_consumed_gas(cost, gas_remaining)?;
    let digest = Sha256::digest(calldata);
    Ok(Bytes::copy_from_slice(&digest))
}

fn ripemd160(calldata: &Bytes, gas_remaining: &mut u64) -> Result<Bytes, PrecompileError> {
    let cost = per_word_cost(RIPEMD160_STATIC, RIPEMD160_WORD, calldata.len());
    increase_precompile_consumed_gas(cost, gas_remaining)?;
    let digest = ripemd::Ripemd160::digest(calldata);
    let mut output = [0u8; 32];
    if let Some(target) = output.get_mut(12..) {
        target.copy_from_slice(&digest);
    }
    Ok(Bytes::copy_from_slice(&output))
}

fn identity(calldata: &Bytes, gas_remaining: &mut u64) -> Result<Bytes, PrecompileError> {
    let cost = per_word_cost(IDENTITY_STATIC, IDENTITY_WORD, calldata.len());
    increase_precompile_consumed_gas(cost, gas_remaining)?;
    Ok(calldata.clone())
}

// ----- 0x05 MODEXP -----

fn modexp(calldata: &Bytes, gas_remaining: &mut u64, fork: Fork) -> Result<Bytes, PrecompileError> {
    let base_size = read_word(calldata, 0);
    let exponent_size = read_word(calldata, 32);
    let modulus_size = read_word(calldata, 64);

    let base_size = usize::try_from(base_size).map_err(|_| PrecompileError::OutOfGas)?;
    let exponent_size = usize::try_from(exponent_size).map_err(|_| PrecompileError::OutOfGas)?;
    let modulus_size = usize::try_from(modulus_size).map_err(|_| PrecompileError::OutOfGas)?;

    // The head of the exponent (at most its first 32 bytes) drives the
    // iteration count of the gas formula.
    let head_len = exponent_size.min(32);
    let mut head = [0u8; 32];
    for (i, slot) in head.iter_mut().take(head_len).enumerate() {
        *slot = calldata
            .get(96_usize.saturating_add(base_size).saturating_add(i))
            .copied()
            .unwrap_or_default();
    }
    let exponent_head =
        kestrel_common::utils::u256_from_big_endian(head.get(..head_len).unwrap_or_default());
    let cost = modexp_gas_cost(base_size, exponent_size, modulus_size, exponent_head, fork);
    increase_precompile_consumed_gas(cost, gas_remaining)?;

    if modulus_size == 0 {
        return Ok(Bytes::new());
    }

    let body = calldata.get(96..).unwrap_or_default();
    let base_bytes = padded(body.get(..base_size.min(body.len())).unwrap_or_default(), base_size);
    let body_after_base = body.get(base_size.min(body.len())..).unwrap_or_default();
    let exponent_bytes = padded(
        body_after_base
            .get(..exponent_size.min(body_after_base.len()))
            .unwrap_or_default(),
        exponent_size,
    );
    let body_after_exponent = body_after_base
        .get(exponent_size.min(body_after_base.len())..)
        .unwrap_or_default();
    let modulus_bytes = padded(
        body_after_exponent
            .get(..modulus_size.min(body_after_exponent.len()))
            .unwrap_or_default(),
        modulus_size,
    );

    let base = natural_from_big_endian(&base_bytes);
    let exponent = natural_from_big_endian(&exponent_bytes);
    let modulus = natural_from_big_endian(&modulus_bytes);

    let result = if modulus == Natural::from(0u32) {
        Natural::from(0u32)
    } else {
        #[expect(clippy::arithmetic_side_effects, reason = "modulus is nonzero")]
        let reduced = base % &modulus;
        reduced.mod_pow(&exponent, &modulus)
    };

    let digits: Vec<u8> = PowerOf2Digits::<u8>::to_power_of_2_digits_desc(&result, 8);
    let mut output = vec![0u8; modulus_size];
    let start = modulus_size.saturating_sub(digits.len());
    if let Some(target) = output.get_mut(start..) {
        target.copy_from_slice(digits.get(digits.len().saturating_sub(modulus_size)..).unwrap_or_default());
    }
    Ok(Bytes::from(output))
}

fn natural_from_big_endian(bytes: &[u8]) -> Natural {
    Natural::from_power_of_2_digits_desc(8, bytes.iter().copied()).unwrap_or_default()
}

fn modexp_gas_cost(
    base_size: usize,
    exponent_size: usize,
    modulus_size: usize,
    exponent_head: U256,
    fork: Fork,
) -> u64 {
    let max_length = u64::try_from(base_size.max(modulus_size)).unwrap_or(u64::MAX);
    let exponent_size = u64::try_from(exponent_size).unwrap_or(u64::MAX);

    let iteration_count = if exponent_size <= 32 && exponent_head.is_zero() {
        0
    } else if exponent_size <= 32 {
        u64::try_from(exponent_head.bits().saturating_sub(1)).unwrap_or(u64::MAX)
    } else {
        let head_bits = u64::try_from(exponent_head.bits().saturating_sub(1)).unwrap_or(u64::MAX);
        exponent_size
            .saturating_sub(32)
            .saturating_mul(8)
            .saturating_add(head_bits)
    };
    let iteration_count = iteration_count.max(1);

    if fork >= Fork::Berlin {
        // EIP-2565.
        let words = max_length.div_ceil(8);
        let multiplication_complexity = words.saturating_mul(words);
        multiplication_complexity
            .saturating_mul(iteration_count)
            .wrapping_div(3)
            .max(MODEXP_MIN_COST)
    } else {
        // EIP-198.
        let x = max_length;
        let multiplication_complexity = if x <= 64 {
            x.saturating_mul(x)
        } else if x <= 1024 {
            x.saturating_mul(x)
                .wrapping_div(4)
                .saturating_add(x.saturating_mul(96))
                .saturating_sub(3072)
        } else {
            x.saturating_mul(x)
                .wrapping_div(16)
                .saturating_add(x.saturating_mul(480))
                .saturating_sub(199_680)
        };
        multiplication_complexity
            .saturating_mul(iteration_count)
            .wrapping_div(20)
    }
}

// ----- 0x06..0x08 BN254 -----

fn read_bn_fq(input: &[u8], offset: usize) -> Result<bn::Fq, PrecompileError> {
    let slice = input
        .get(offset..offset.saturating_add(32))
        .ok_or(PrecompileError::Failure)?;
    bn::Fq::from_slice(slice).map_err(|_| PrecompileError::Failure)
}

fn read_bn_g1(input: &[u8], offset: usize) -> Result<bn::G1, PrecompileError> {
    use bn::{AffineG1, Fq, Group, G1};

    let x = read_bn_fq(input, offset)?;
    let y = read_bn_fq(input, offset.saturating_add(32))?;
    if x == Fq::zero() && y == Fq::zero() {
        Ok(G1::zero())
    } else {
        AffineG1::new(x, y)
            .map(Into::into)
            .map_err(|_| PrecompileError::Failure)
    }
}

fn write_bn_g1(point: bn::G1) -> Result<Bytes, PrecompileError> {
    let mut output = [0u8; 64];
    if let Some(affine) = bn::AffineG1::from_jacobian(point) {
        affine
            .x()
            .to_big_endian(output.get_mut(..32).ok_or(PrecompileError::Failure)?)
            .map_err(|_| PrecompileError::Failure)?;
        affine
            .y()
            .to_big_endian(output.get_mut(32..).ok_or(PrecompileError::Failure)?)
            .map_err(|_| PrecompileError::Failure)?;
    }
    Ok(Bytes::copy_from_slice(&output))
}

fn ecadd(calldata: &Bytes, gas_remaining: &mut u64, fork: Fork) -> Result<Bytes, PrecompileError> {
    let cost = if fork >= Fork::Istanbul {
        ECADD_COST_ISTANBUL
    } else {
        ECADD_COST_BYZANTIUM
    };
    increase_precompile_consumed_gas(cost, gas_remaining)?;

    let input = padded(calldata, 128);
    let first = read_bn_g1(&input, 0)?;
    let second = read_bn_g1(&input, 64)?;
    #[expect(clippy::arithmetic_side_effects, reason = "group addition")]
    write_bn_g1(first + second)
}

fn ecmul(calldata: &Bytes, gas_remaining: &mut u64, fork: Fork) -> Result<Bytes, PrecompileError> {
    let cost = if fork >= Fork::Istanbul {
        ECMUL_COST_ISTANBUL
    } else {
        ECMUL_COST_BYZANTIUM
    };
    increase_precompile_consumed_gas(cost, gas_remaining)?;

    let input = padded(calldata, 96);
    let point = read_bn_g1(&input, 0)?;
    let scalar = bn::Fr::from_slice(input.get(64..96).ok_or(PrecompileError::Failure)?)
        .map_err(|_| PrecompileError::Failure)?;
    #[expect(clippy::arithmetic_side_effects, reason = "group scalar multiplication")]
    write_bn_g1(point * scalar)
}

fn ecpairing(calldata: &Bytes, gas_remaining: &mut u64, fork: Fork) -> Result<Bytes, PrecompileError> {
    use bn::{AffineG2, Fq2, Group, G2, Gt};

    if !calldata.len().is_multiple_of(192) {
        return Err(PrecompileError::Failure);
    }
    let pair_count = u64::try_from(calldata.len().wrapping_div(192)).unwrap_or(u64::MAX);
    let (static_cost, pair_cost) = if fork >= Fork::Istanbul {
        (ECPAIRING_STATIC_ISTANBUL, ECPAIRING_PAIR_ISTANBUL)
    } else {
        (ECPAIRING_STATIC_BYZANTIUM, ECPAIRING_PAIR_BYZANTIUM)
    };
    let cost = static_cost.saturating_add(pair_cost.saturating_mul(pair_count));
    increase_precompile_consumed_gas(cost, gas_remaining)?;

    let mut pairs = Vec::with_capacity(usize::try_from(pair_count).unwrap_or(0));
    let mut offset = 0usize;
    while offset < calldata.len() {
        let g1 = read_bn_g1(calldata, offset)?;

        // G2 field elements are encoded imaginary-first (EIP-197).
        let x_imaginary = read_bn_fq(calldata, offset.saturating_add(64))?;
        let x_real = read_bn_fq(calldata, offset.saturating_add(96))?;
        let y_imaginary = read_bn_fq(calldata, offset.saturating_add(128))?;
        let y_real = read_bn_fq(calldata, offset.saturating_add(160))?;

        let x = Fq2::new(x_real, x_imaginary);
        let y = Fq2::new(y_real, y_imaginary);
        let g2 = if x == Fq2::zero() && y == Fq2::zero() {
            G2::zero()
        } else {
            AffineG2::new(x, y)
                .map(Into::into)
                .map_err(|_| PrecompileError::Failure)?
        };

        pairs.push((g1, g2));
        offset = offset.saturating_add(192);
    }

    let success = bn::pairing_batch(&pairs) == Gt::one();
    let mut output = [0u8; 32];
    if let Some(last) = output.last_mut() {
        *last = u8::from(success);
    }
    Ok(Bytes::copy_from_slice(&output))
}

// ----- 0x09 BLAKE2F -----

const BLAKE2_IV: [u64; 8] = [
    0x6a09e667f3bcc908,
    0xbb67ae8584caa73b,
    0x3c6ef372fe94f82b,
    0xa54ff53a5f1d36f1,
    0x510e527fade682d1,
    0x9b05688c2b3e6c1f,
    0x1f83d9abfb41bd6b,
    0x5be0cd19137e2179,
];

const BLAKE2_SIGMA: [[usize; 16]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
    [14, 10, 4, 8, 9, 15, 13, 6, 1, 12, 0, 2, 11, 7, 5, 3],
    [11, 8, 12, 0, 5, 2, 15, 13, 10, 14, 3, 6, 7, 1, 9, 4],
    [7, 9, 3, 1, 13, 12, 11, 14, 2, 6, 5, 10, 4, 0, 15, 8],
    [9, 0, 5, 7, 2, 4, 10, 15, 14, 1, 11, 12, 6, 8, 3, 13],
    [2, 12, 6, 10, 0, 11, 8, 3, 4, 13, 7, 5, 15, 14, 1, 9],
    [12, 5, 1, 15, 14, 13, 4, 10, 0, 7, 6, 3, 9, 2, 8, 11],
    [13, 11, 7, 14, 12, 1, 3, 9, 5, 0, 15, 4, 8, 6, 2, 10],
    [6, 15, 14, 9, 11, 3, 0, 8, 12, 2, 13, 7, 1, 4, 10, 5],
    [10, 2, 8, 4, 7, 6, 1, 5, 15, 11, 9, 14, 3, 12, 13, 0],
];

#[allow(clippy::indexing_slicing, clippy::many_single_char_names)]
fn blake2_g(v: &mut [u64; 16], a: usize, b: usize, c: usize, d: usize, x: u64, y: u64) {
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(x);
    v[d] = (v[d] ^ v[a]).rotate_right(32);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(24);
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(y);
    v[d] = (v[d] ^ v[a]).rotate_right(16);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(63);
}

/// EIP-152 compression function F.
#[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
fn blake2_compress(rounds: u32, h: &mut [u64; 8], m: &[u64; 16], t: &[u64; 2], last: bool) {
    let mut v = [0u64; 16];
    v[..8].copy_from_slice(h);
    v[8..].copy_from_slice(&BLAKE2_IV);
    v[12] ^= t[0];
    v[13] ^= t[1];
    if last {
        v[14] = !v[14];
    }

    for round in 0..usize::try_from(rounds).unwrap_or(usize::MAX) {
        let s = &BLAKE2_SIGMA[round % 10];
        blake2_g(&mut v, 0, 4, 8, 12, m[s[0]], m[s[1]]);
        blake2_g(&mut v, 1, 5, 9, 13, m[s[2]], m[s[3]]);
        blake2_g(&mut v, 2, 6, 10, 14, m[s[4]], m[s[5]]);
        blake2_g(&mut v, 3, 7, 11, 15, m[s[6]], m[s[7]]);
        blake2_g(&mut v, 0, 5, 10, 15, m[s[8]], m[s[9]]);
        blake2_g(&mut v, 1, 6, 11, 12, m[s[10]], m[s[11]]);
        blake2_g(&mut v, 2, 7, 8, 13, m[s[12]], m[s[13]]);
        blake2_g(&mut v, 3, 4, 9, 14, m[s[14]], m[s[15]]);
    }

    for i in 0..8 {
        h[i] ^= v[i] ^ v[i + 8];
    }
}

#[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
fn blake2f(calldata: &Bytes, gas_remaining: &mut u64) -> Result<Bytes, PrecompileError> {
    if calldata.len() != 213 {
        return Err(PrecompileError::Failure);
    }

    let mut rounds_bytes = [0u8; 4];
    rounds_bytes.copy_from_slice(&calldata[..4]);
    let rounds = u32::from_be_bytes(rounds_bytes);

    let final_flag = calldata[212];
    if final_flag > 1 {
        return Err(PrecompileError::Failure);
    }

    increase_precompile_consumed_gas(
        u64::from(rounds).saturating_mul(BLAKE2F_ROUND_COST),
        gas_remaining,
    )?;

    let read_u64 = |offset: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&calldata[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    };

    let mut h = [0u64; 8];
    for (i, slot) in h.iter_mut().enumerate() {
        *slot = read_u64(4 + i * 8);
    }
    let mut m = [0u64; 16];
    for (i, slot) in m.iter_mut().enumerate() {
        *slot = read_u64(68 + i * 8);
    }
    let t = [read_u64(196), read_u64(204)];

    blake2_compress(rounds, &mut h, &m, &t, final_flag == 1);

    let mut output = Vec::with_capacity(64);
    for word in h {
        output.extend_from_slice(&word.to_le_bytes());
    }
    Ok(Bytes::from(output))
}

// ----- 0x0A KZG point evaluation -----

fn point_evaluation(calldata: &Bytes, gas_remaining: &mut u64) -> Result<Bytes, PrecompileError> {
    if calldata.len() != 192 {
        return Err(PrecompileError::Failure);
    }
    increase_precompile_consumed_gas(POINT_EVALUATION_COST, gas_remaining)?;

    let versioned_hash = calldata.get(..32).ok_or(PrecompileError::Failure)?;
    let z = calldata.get(32..64).ok_or(PrecompileError::Failure)?;
    let y = calldata.get(64..96).ok_or(PrecompileError::Failure)?;
    let commitment = calldata.get(96..144).ok_or(PrecompileError::Failure)?;
    let proof = calldata.get(144..192).ok_or(PrecompileError::Failure)?;

    // The versioned hash commits to the commitment (EIP-4844).
    let mut expected_hash: [u8; 32] = Sha256::digest(commitment).into();
    if let Some(version) = expected_hash.first_mut() {
        *version = VERSIONED_HASH_VERSION_KZG;
    }
    if versioned_hash != expected_hash.as_slice() {
        return Err(PrecompileError::Failure);
    }

    let commitment = kzg_rs::Bytes48::from_slice(commitment).map_err(|_| PrecompileError::Failure)?;
    let z = kzg_rs::Bytes32::from_slice(z).map_err(|_| PrecompileError::Failure)?;
    let y = kzg_rs::Bytes32::from_slice(y).map_err(|_| PrecompileError::Failure)?;
    let proof = kzg_rs::Bytes48::from_slice(proof).map_err(|_| PrecompileError::Failure)?;

    let valid = kzg_rs::KzgProof::verify_kzg_proof(&commitment, &z, &y, &proof, &kzg_rs::get_kzg_settings())
        .unwrap_or(false);
    if !valid {
        return Err(PrecompileError::Failure);
    }

    let mut output = Vec::with_capacity(64);
    output.extend_from_slice(&u256_to_big_endian(U256::from(FIELD_ELEMENTS_PER_BLOB)));
    output.extend_from_slice(&BLS_MODULUS_BYTES);
    Ok(Bytes::from(output))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

    use super::*;

    fn run(address: u64, input: &[u8], gas: u64) -> (Result<Bytes, PrecompileError>, u64) {
        let mut gas_remaining = gas;
        let result = execute_precompile(
            Address::from_low_u64_be(address),
            &Bytes::copy_from_slice(input),
            &mut gas_remaining,
            Fork::Cancun,
        );
        (result, gas_remaining)
    }

    #[test]
    fn dispatch_is_fork_gated() {
        let five = Address::from_low_u64_be(5);
        assert!(!is_precompile(&five, Fork::Homestead));
        assert!(is_precompile(&five, Fork::Byzantium));
        let ten = Address::from_low_u64_be(10);
        assert!(!is_precompile(&ten, Fork::London));
        assert!(is_precompile(&ten, Fork::Cancun));
        assert!(!is_precompile(&Address::from_low_u64_be(11), Fork::Cancun));
        assert!(!is_precompile(&Address::zero(), Fork::Cancun));
    }

    #[test]
    fn sha256_of_empty_input() {
        let (result, gas_remaining) = run(2, &[], 1000);
        assert_eq!(
            hex::encode(result.unwrap()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(gas_remaining, 1000 - 60);
    }

    #[test]
    fn ripemd160_output_is_left_padded() {
        let (result, _) = run(3, &[], 1000);
        assert_eq!(
            hex::encode(result.unwrap()),
            "0000000000000000000000009c1185a5c5e9fc54612808977ee8f548b2258d31"
        );
    }

    #[test]
    fn identity_copies_and_charges_per_word() {
        let (result, gas_remaining) = run(4, &[1, 2, 3], 100);
        assert_eq!(result.unwrap(), Bytes::copy_from_slice(&[1, 2, 3]));
        assert_eq!(gas_remaining, 100 - 18);
    }

    #[test]
    fn insufficient_gas_is_out_of_gas() {
        let (result, gas_remaining) = run(2, &[], 59);
        assert_eq!(result, Err(PrecompileError::OutOfGas));
        assert_eq!(gas_remaining, 59);
    }

    #[test]
    fn ecrecover_known_vector() {
        let mut input = Vec::new();
        input.extend_from_slice(
            &hex::decode("456e9aea5e197a1f1af7a3e85a3212fa4049a3ba34c2289b4c860fc0b0c64ef3")
                .unwrap(),
        );
        input.extend_from_slice(&[0u8; 31]);
        input.push(28);
        input.extend_from_slice(
            &hex::decode("9242685bf161793cc25603c231bc2f568eb630ea16aa137d2664ac8038825608")
                .unwrap(),
        );
        input.extend_from_slice(
            &hex::decode("4f8ae3bd7535248d0bd448298cc2e2071e56992d0774dc340c368ae950852ada")
                .unwrap(),
        );

        let (result, _) = run(1, &input, 10_000);
        assert_eq!(
            hex::encode(result.unwrap()),
            "0000000000000000000000007156526fbd7a3c72969b54f64e42c10fbb768c8a"
        );
    }

    #[test]
    fn ecrecover_invalid_v_succeeds_empty() {
        let input = [0u8; 128];
        let (result, gas_remaining) = run(1, &input, 10_000);
        assert_eq!(result.unwrap(), Bytes::new());
        assert_eq!(gas_remaining, 7000);
    }

    #[test]
    fn modexp_small_vector() {
        // 3^2 mod 5 = 4, one-byte operands.
        let mut input = Vec::new();
        input.extend_from_slice(&u256_to_big_endian(U256::from(1)));
        input.extend_from_slice(&u256_to_big_endian(U256::from(1)));
        input.extend_from_slice(&u256_to_big_endian(U256::from(1)));
        input.extend_from_slice(&[3, 2, 5]);

        let (result, _) = run(5, &input, 10_000);
        assert_eq!(result.unwrap(), Bytes::copy_from_slice(&[4]));
    }

    #[test]
    fn modexp_zero_modulus_yields_empty_output() {
        let input = [0u8; 96];
        let (result, gas_remaining) = run(5, &input, 10_000);
        assert_eq!(result.unwrap(), Bytes::new());
        // EIP-2565 floor price.
        assert_eq!(gas_remaining, 10_000 - 200);
    }

    #[test]
    fn ecadd_identity_plus_identity() {
        let (result, gas_remaining) = run(6, &[0u8; 128], 1000);
        assert_eq!(result.unwrap(), Bytes::copy_from_slice(&[0u8; 64]));
        assert_eq!(gas_remaining, 1000 - 150);
    }

    #[test]
    fn ecpairing_empty_input_is_success() {
        let (result, _) = run(8, &[], 100_000);
        let output = result.unwrap();
        assert_eq!(output.len(), 32);
        assert_eq!(output[31], 1);
    }

    #[test]
    fn ecpairing_rejects_ragged_input() {
        let (result, _) = run(8, &[0u8; 191], 1_000_000);
        assert_eq!(result, Err(PrecompileError::Failure));
    }

    #[test]
    fn blake2f_eip152_vector() {
        let input = hex::decode(
            "0000000c48c9bdf267e6096a3ba7ca8485ae67bb2bf894fe72f36e3cf1361d5f3af54fa5\
             d182e6ad7f520e511f6c3e2b8c68059b6bbd41fbabd9831f79217e1319cde05b\
             6162630000000000000000000000000000000000000000000000000000000000\
             0000000000000000000000000000000000000000000000000000000000000000\
             0000000000000000000000000000000000000000000000000000000000000000\
             0000000000000000000000000000000000000000000000000000000000000000\
             0300000000000000000000000000000001",
        )
        .unwrap();
        let (result, gas_remaining) = run(9, &input, 1000);
        assert_eq!(
            hex::encode(result.unwrap()),
            "ba80a53f981c4d0d6a2797b69f12f6e94c212f14685ac4b74b12bb6fdbffa2d1\
             7d87c5392aab792dc252d5de4533cc9518d38aa8dbf1925ab92386edd4009923"
        );
        assert_eq!(gas_remaining, 1000 - 12);
    }

    #[test]
    fn blake2f_rejects_bad_length_and_flag() {
        let (result, _) = run(9, &[0u8; 212], 1000);
        assert_eq!(result, Err(PrecompileError::Failure));

        let mut input = vec![0u8; 213];
        input[212] = 2;
        let (result, _) = run(9, &input, 1000);
        assert_eq!(result, Err(PrecompileError::Failure));
    }

    #[test]
    fn point_evaluation_rejects_bad_versioned_hash() {
        let input = vec![0u8; 192];
        let (result, _) = run(10, &input, 100_000);
        assert_eq!(result, Err(PrecompileError::Failure));
    }
}
