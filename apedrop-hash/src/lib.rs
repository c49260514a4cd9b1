// File: apedrop-hash/src/lib.rs
use sha3::{Digest as _, Keccak256};

pub const DIGEST_LEN: usize = 32; // 256-bit output

pub type Digest = [u8; DIGEST_LEN];

#[inline]
pub fn keccak256(data: &[u8]) -> Digest {
    Keccak256::digest(data).into()
}

/// Leaf digest of an already ABI-encoded record: `keccak256(keccak256(encoded))`.
///
/// The second round keeps a 64-byte leaf preimage from ever being read as a
/// pair of child digests.
#[inline]
pub fn hash_leaf(encoded: &[u8]) -> Digest {
    keccak256(&keccak256(encoded))
}

/// Commutative node hash: `keccak256(min(a, b) ++ max(a, b))`.
#[inline]
pub fn hash_pair(a: &Digest, b: &Digest) -> Digest {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    Keccak256::new()
        .chain_update(lo)
        .chain_update(hi)
        .finalize()
        .into()
}

/// `0x`-prefixed lowercase hex.
pub fn to_hex(d: &Digest) -> String {
    format!("0x{}", hex::encode(d))
}

/// Parse a digest from hex, with or without `0x`. Anything but exactly
/// 64 hex digits is rejected.
pub fn parse_digest(s: &str) -> Result<Digest, hex::FromHexError> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let mut out = [0u8; DIGEST_LEN];
    hex::decode_to_slice(s, &mut out)?;
    Ok(out)
}
