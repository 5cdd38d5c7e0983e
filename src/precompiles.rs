use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::common::{address::Address, hash::keccak256};

/// Fixed-address native contracts. They execute synchronously, without a
/// new interpreter frame, paid from the gas forwarded by the caller.
pub fn is_precompile(address: &Address) -> bool {
    let bytes = address.0;
    bytes[0..19] == [0u8; 19] && (1..=4).contains(&bytes[19])
}

pub fn gas_cost(address: &Address, input: &[u8]) -> u64 {
    let words = input.len().div_ceil(32) as u64;
    match address.0[19] {
        1 => 3000,              // ecrecover
        2 => 60 + 12 * words,   // sha256
        3 => 600 + 120 * words, // ripemd160
        4 => 15 + 3 * words,    // identity
        _ => 0,
    }
}

/// Run the precompile. Invalid input never faults the caller: recovery
/// failures return empty output, the way the wrapped primitives behave.
pub fn execute(address: &Address, input: &[u8]) -> Vec<u8> {
    match address.0[19] {
        1 => ecrecover(input),
        2 => sha256(input),
        3 => ripemd160(input),
        4 => identity(input),
        _ => vec![],
    }
}

// 0x01: recover the signer address from a 32-byte message hash and a
// 65-byte (v, r, s) signature, input laid out as hash ++ v ++ r ++ s.
fn ecrecover(input: &[u8]) -> Vec<u8> {
    let mut padded = [0u8; 128];
    let len = input.len().min(128);
    padded[..len].copy_from_slice(&input[..len]);

    let msg_hash = &padded[0..32];
    if padded[32..63].iter().any(|byte| *byte != 0) {
        return vec![];
    }
    let v = padded[63];
    if v != 27 && v != 28 {
        return vec![];
    }
    let mut recovery = v - 27;

    let Ok(signature) = Signature::from_slice(&padded[64..128]) else {
        return vec![];
    };
    // the engine accepts high-s signatures; the curve library does not
    let signature = match signature.normalize_s() {
        Some(normalized) => {
            recovery ^= 1;
            normalized
        }
        None => signature,
    };

    let Some(recovery_id) = RecoveryId::from_byte(recovery) else {
        return vec![];
    };
    let Ok(key) = VerifyingKey::recover_from_prehash(msg_hash, &signature, recovery_id) else {
        return vec![];
    };

    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut out = vec![0u8; 32];
    out[12..].copy_from_slice(&hash[12..]);
    out
}

// 0x02
fn sha256(input: &[u8]) -> Vec<u8> {
    Sha256::digest(input).to_vec()
}

// 0x03: 20-byte digest, left-padded to 32
fn ripemd160(input: &[u8]) -> Vec<u8> {
    let digest = Ripemd160::digest(input);
    let mut out = vec![0u8; 32];
    out[12..].copy_from_slice(&digest);
    out
}

// 0x04
fn identity(input: &[u8]) -> Vec<u8> {
    input.to_vec()
}
