// File: apedrop-leaf/src/lib.rs
//! Eligibility records and their canonical leaf encoding.
//!
//! A record is ABI-encoded field by field according to a [`LeafSchema`]
//! (one 32-byte word per field) and hashed twice with Keccak-256. With the
//! default `["address", "uint256"]` schema this is exactly
//! `keccak256(bytes.concat(keccak256(abi.encode(account, amount))))`, which is
//! what an on-chain claim contract recomputes for `msg.sender`.
use std::fmt;
use std::str::FromStr;

use apedrop_hash::{hash_leaf, Digest};
use thiserror::Error;

pub use alloy_primitives::{Address, U256};

/// Size of one ABI head word.
pub const WORD_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeafError {
    #[error("invalid address {input:?}: {reason}")]
    InvalidAddress { input: String, reason: &'static str },

    #[error("invalid amount {input:?}: {reason}")]
    InvalidAmount { input: String, reason: &'static str },

    #[error("invalid leaf schema: {0}")]
    InvalidSchema(String),
}

/// Parse a 20-byte address.
///
/// Accepts 40 hex digits with an optional `0x` prefix. Mixed-case input is
/// treated as EIP-55 and must carry a valid checksum.
pub fn parse_address(input: &str) -> Result<Address, LeafError> {
    let invalid = |reason| LeafError::InvalidAddress { input: input.to_string(), reason };
    let s = input.trim();
    let body = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if body.len() != 40 {
        return Err(invalid("expected 40 hex digits"));
    }
    let mut bytes = [0u8; 20];
    hex::decode_to_slice(body, &mut bytes).map_err(|_| invalid("not hex"))?;
    let address = Address::from(bytes);

    let has_lower = body.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = body.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper && address.to_checksum(None)[2..] != *body {
        return Err(invalid("bad EIP-55 checksum"));
    }
    Ok(address)
}

/// Parse an unsigned 256-bit amount, decimal or `0x`/`0X`-prefixed hex.
pub fn parse_amount(input: &str) -> Result<U256, LeafError> {
    let invalid = |reason| LeafError::InvalidAmount { input: input.to_string(), reason };
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid("empty"));
    }
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) if !h.is_empty() && h.bytes().all(|b| b.is_ascii_hexdigit()) => (h, 16),
        Some(_) => return Err(invalid("not hex")),
        None if s.bytes().all(|b| b.is_ascii_digit()) => (s, 10),
        None => return Err(invalid("not an unsigned integer")),
    };
    U256::from_str_radix(digits, radix).map_err(|_| invalid("does not fit in 256 bits"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EligibilityRecord {
    pub address: Address,
    pub amount: U256,
}

impl EligibilityRecord {
    pub fn new(address: Address, amount: U256) -> Self {
        Self { address, amount }
    }

    /// Validate and build a record from its textual fields.
    pub fn parse(address: &str, amount: &str) -> Result<Self, LeafError> {
        Ok(Self { address: parse_address(address)?, amount: parse_amount(amount)? })
    }

    /// EIP-55 form of the address.
    pub fn checksummed(&self) -> String {
        self.address.to_checksum(None)
    }
}

impl fmt::Display for EligibilityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.checksummed(), self.amount)
    }
}

/// One typed field of the leaf layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LeafField {
    /// ABI `address`: 12 zero bytes then the 20 address bytes.
    Address,
    /// ABI `uint256`: 32 bytes big-endian.
    Amount,
}

impl LeafField {
    pub fn abi_type(self) -> &'static str {
        match self {
            LeafField::Address => "address",
            LeafField::Amount => "uint256",
        }
    }

    fn word(self, record: &EligibilityRecord) -> [u8; WORD_LEN] {
        match self {
            LeafField::Address => {
                let mut w = [0u8; WORD_LEN];
                w[WORD_LEN - 20..].copy_from_slice(record.address.as_slice());
                w
            }
            LeafField::Amount => record.amount.to_be_bytes::<WORD_LEN>(),
        }
    }

    fn text(self, record: &EligibilityRecord) -> String {
        match self {
            LeafField::Address => record.checksummed(),
            LeafField::Amount => record.amount.to_string(),
        }
    }
}

impl FromStr for LeafField {
    type Err = LeafError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "address" => Ok(LeafField::Address),
            "uint256" | "uint" => Ok(LeafField::Amount),
            other => Err(LeafError::InvalidSchema(format!("unsupported field type {other:?}"))),
        }
    }
}

impl fmt::Display for LeafField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abi_type())
    }
}

/// Ordered field layout used to encode every leaf of one tree.
///
/// Each record field appears exactly once, so a schema is a permutation of
/// [`LeafField`]. The default is `["address", "uint256"]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LeafSchema {
    fields: Vec<LeafField>,
}

impl LeafSchema {
    pub fn new(fields: Vec<LeafField>) -> Result<Self, LeafError> {
        for want in [LeafField::Address, LeafField::Amount] {
            match fields.iter().filter(|f| **f == want).count() {
                1 => {}
                0 => return Err(LeafError::InvalidSchema(format!("missing field {want}"))),
                _ => return Err(LeafError::InvalidSchema(format!("field {want} repeated"))),
            }
        }
        Ok(Self { fields })
    }

    /// `["address", "uint256"]`
    pub fn airdrop() -> Self {
        Self { fields: vec![LeafField::Address, LeafField::Amount] }
    }

    pub fn from_abi_types<S: AsRef<str>>(types: &[S]) -> Result<Self, LeafError> {
        let fields = types
            .iter()
            .map(|t| t.as_ref().parse())
            .collect::<Result<Vec<LeafField>, _>>()?;
        Self::new(fields)
    }

    pub fn fields(&self) -> &[LeafField] {
        &self.fields
    }

    pub fn abi_types(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.abi_type().to_string()).collect()
    }

    /// ABI head encoding of `record`, one word per field.
    pub fn encode(&self, record: &EligibilityRecord) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.fields.len() * WORD_LEN);
        for f in &self.fields {
            out.extend_from_slice(&f.word(record));
        }
        out
    }

    pub fn leaf(&self, record: &EligibilityRecord) -> Digest {
        hash_leaf(&self.encode(record))
    }

    /// Field values as text, in schema order.
    pub fn values(&self, record: &EligibilityRecord) -> Vec<String> {
        self.fields.iter().map(|f| f.text(record)).collect()
    }

    /// Inverse of [`LeafSchema::values`].
    pub fn record_from_values<S: AsRef<str>>(&self, values: &[S]) -> Result<EligibilityRecord, LeafError> {
        if values.len() != self.fields.len() {
            return Err(LeafError::InvalidSchema(format!(
                "expected {} values, got {}",
                self.fields.len(),
                values.len()
            )));
        }
        let mut address = None;
        let mut amount = None;
        for (f, v) in self.fields.iter().zip(values) {
            match f {
                LeafField::Address => address = Some(parse_address(v.as_ref())?),
                LeafField::Amount => amount = Some(parse_amount(v.as_ref())?),
            }
        }
        match (address, amount) {
            (Some(address), Some(amount)) => Ok(EligibilityRecord { address, amount }),
            _ => Err(LeafError::InvalidSchema("schema does not cover every field".into())),
        }
    }
}

impl Default for LeafSchema {
    fn default() -> Self {
        Self::airdrop()
    }
}

impl fmt::Display for LeafSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.abi_types().join(", "))
    }
}

/// Leaf digest of `(address, amount)` under the default schema.
pub fn encode_leaf(address: Address, amount: U256) -> Digest {
    LeafSchema::airdrop().leaf(&EligibilityRecord { address, amount })
}
