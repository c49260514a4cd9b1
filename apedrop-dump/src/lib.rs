// File: apedrop-dump/src/lib.rs
//! JSON persistence for built trees and per-address proof maps.
//!
//! A tree dump carries the full layer structure plus every record in schema
//! order, so proofs can be served later without the original eligibility
//! list. Loading re-validates the whole structure before handing back a
//! [`MerkleTree`].
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use apedrop_hash::{parse_digest, to_hex, Digest};
use apedrop_leaf::{parse_address, parse_amount, EligibilityRecord, LeafSchema};
use apedrop_merkle::{MerkleTree, Proof};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Layered dump tag. Not OpenZeppelin's `standard-v1`; the two are not interchangeable.
pub const FORMAT: &str = "apedrop-layered-v1";

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DumpError>;

fn malformed(msg: impl Into<String>) -> DumpError {
    DumpError::Serialization(msg.into())
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> DumpError + '_ {
    move |source| DumpError::Io { path: path.to_path_buf(), source }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TreeDump {
    pub format: String,
    pub leaf_encoding: Vec<String>,
    #[serde(default)]
    pub sort_leaves: bool,
    /// Hex digests, leaves first, root last.
    pub layers: Vec<Vec<String>>,
    pub values: Vec<DumpValue>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DumpValue {
    /// Record fields as text, in `leafEncoding` order.
    pub value: Vec<String>,
    /// Leaf position in the bottom layer.
    pub tree_index: usize,
}

impl TreeDump {
    pub fn from_tree(tree: &MerkleTree) -> Self {
        let schema = tree.schema();
        let values = tree
            .records()
            .iter()
            .zip(tree.leaf_positions())
            .map(|(r, &tree_index)| DumpValue { value: schema.values(r), tree_index })
            .collect();
        Self {
            format: FORMAT.to_string(),
            leaf_encoding: schema.abi_types(),
            sort_leaves: tree.sort_leaves(),
            layers: tree.layers().iter().map(|l| l.iter().map(to_hex).collect()).collect(),
            values,
        }
    }

    pub fn into_tree(self) -> Result<MerkleTree> {
        if self.format != FORMAT {
            return Err(malformed(format!("unknown format {:?}, expected {FORMAT:?}", self.format)));
        }
        let schema = LeafSchema::from_abi_types(self.leaf_encoding.as_slice()).map_err(|e| malformed(e.to_string()))?;

        let layers = self
            .layers
            .iter()
            .enumerate()
            .map(|(depth, layer)| {
                layer
                    .iter()
                    .enumerate()
                    .map(|(i, h)| {
                        parse_digest(h).map_err(|e| malformed(format!("layer {depth} node {i}: {e}")))
                    })
                    .collect::<Result<Vec<Digest>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(self.values.len());
        let mut positions = Vec::with_capacity(self.values.len());
        for (i, v) in self.values.iter().enumerate() {
            let record = schema
                .record_from_values(v.value.as_slice())
                .map_err(|e| malformed(format!("value {i}: {e}")))?;
            records.push(record);
            positions.push(v.tree_index);
        }

        MerkleTree::from_parts(schema, self.sort_leaves, records, positions, layers)
            .map_err(|e| malformed(e.to_string()))
    }
}

pub fn to_json(tree: &MerkleTree) -> Result<String> {
    serde_json::to_string_pretty(&TreeDump::from_tree(tree)).map_err(|e| malformed(e.to_string()))
}

pub fn from_json(s: &str) -> Result<MerkleTree> {
    let dump: TreeDump = serde_json::from_str(s).map_err(|e| malformed(e.to_string()))?;
    dump.into_tree()
}

pub fn save_tree(path: &Path, tree: &MerkleTree) -> Result<()> {
    write_atomic(path, to_json(tree)?.as_bytes())?;
    debug!(path = %path.display(), leaves = tree.len(), "saved tree dump");
    Ok(())
}

pub fn load_tree(path: &Path) -> Result<MerkleTree> {
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    let tree = from_json(&text)?;
    debug!(path = %path.display(), leaves = tree.len(), root = %to_hex(&tree.root()), "loaded tree dump");
    Ok(tree)
}

/// Write through a temp file in the target directory, then rename over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err(path))?;
    tmp.write_all(data).map_err(io_err(path))?;
    tmp.as_file().sync_all().map_err(io_err(path))?;
    tmp.persist(path).map_err(|e| io_err(path)(e.error))?;
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProofEntry {
    pub amount: String,
    pub proof: Vec<String>,
}

impl ProofEntry {
    /// Parse back into a record and its sibling digests.
    pub fn decode(&self, address: &str) -> Result<(EligibilityRecord, Proof)> {
        let address = parse_address(address).map_err(|e| malformed(e.to_string()))?;
        let amount = parse_amount(&self.amount).map_err(|e| malformed(e.to_string()))?;
        let proof = self
            .proof
            .iter()
            .map(|h| parse_digest(h).map_err(|e| malformed(format!("proof element {h:?}: {e}"))))
            .collect::<Result<Proof>>()?;
        Ok((EligibilityRecord::new(address, amount), proof))
    }
}

/// Checksummed address → amount and proof.
pub type ProofMap = BTreeMap<String, ProofEntry>;

/// One entry per distinct address. When an address appears more than once
/// the last record overwrites the earlier ones.
pub fn proof_map(tree: &MerkleTree) -> ProofMap {
    let proofs = tree.proofs();
    let mut map = ProofMap::new();
    for ((_, r), proof) in tree.entries().zip(proofs) {
        let key = r.checksummed();
        let entry = ProofEntry { amount: r.amount.to_string(), proof: proof.iter().map(to_hex).collect() };
        if let Some(prev) = map.insert(key.clone(), entry) {
            warn!(address = %key, replaced = %prev.amount, amount = %r.amount, "duplicate address, keeping last entry");
        }
    }
    map
}

pub fn save_proofs(path: &Path, proofs: &ProofMap) -> Result<()> {
    let text = serde_json::to_string_pretty(proofs).map_err(|e| malformed(e.to_string()))?;
    write_atomic(path, text.as_bytes())?;
    debug!(path = %path.display(), entries = proofs.len(), "saved proof map");
    Ok(())
}

pub fn load_proofs(path: &Path) -> Result<ProofMap> {
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    serde_json::from_str(&text).map_err(|e| malformed(e.to_string()))
}
