// File: apedrop-merkle/src/lib.rs
use std::fmt::Write as _;

use apedrop_hash::{hash_pair, to_hex, Digest};
use apedrop_leaf::{EligibilityRecord, LeafError, LeafSchema};
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    #[error(transparent)]
    Leaf(#[from] LeafError),

    #[error("cannot build a merkle tree from zero records")]
    EmptyTree,

    #[error("leaf index {index} out of range for tree with {len} leaves")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("record {0} is not in the tree")]
    RecordNotFound(String),

    #[error("inconsistent tree: {0}")]
    Inconsistent(String),
}

pub type Result<T> = std::result::Result<T, MerkleError>;

/// Sibling digests from leaf to root.
pub type Proof = Vec<Digest>;

#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    pub schema: LeafSchema,
    /// Order leaves by digest before layering. Records keep their input order.
    pub sort_leaves: bool,
}

/// Binary merkle tree stored as index-addressed layers.
///
/// `layers[0]` holds the leaf digests and the last layer holds only the root.
/// Each layer is built by hashing adjacent pairs with [`hash_pair`]; an odd
/// trailing node is carried up unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleTree {
    schema: LeafSchema,
    sort_leaves: bool,
    records: Vec<EligibilityRecord>,
    // record index -> position in layers[0]
    positions: Vec<usize>,
    layers: Vec<Vec<Digest>>,
}

/// Build every layer above `leaves`. `leaves` must not be empty.
pub fn build_layers(leaves: Vec<Digest>) -> Vec<Vec<Digest>> {
    let mut layers = vec![leaves];
    while layers[layers.len() - 1].len() > 1 {
        let next: Vec<Digest> = layers[layers.len() - 1]
            .chunks(2)
            .map(|pair| match pair {
                [l, r] => hash_pair(l, r),
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
        layers.push(next);
    }
    layers
}

/// Fold `proof` into `leaf` with sorted-pair hashing, yielding a candidate root.
pub fn process_proof(leaf: Digest, proof: &[Digest]) -> Digest {
    proof.iter().fold(leaf, |acc, sib| hash_pair(&acc, sib))
}

/// Check a claim under the default `["address", "uint256"]` leaf layout.
pub fn verify(record: &EligibilityRecord, proof: &[Digest], root: &Digest) -> bool {
    verify_with(&LeafSchema::airdrop(), record, proof, root)
}

pub fn verify_with(schema: &LeafSchema, record: &EligibilityRecord, proof: &[Digest], root: &Digest) -> bool {
    process_proof(schema.leaf(record), proof) == *root
}

impl MerkleTree {
    /// Build with the default schema, leaves in input order.
    pub fn build(records: &[EligibilityRecord]) -> Result<Self> {
        Self::build_with(records, &BuildOptions::default())
    }

    pub fn build_with(records: &[EligibilityRecord], opts: &BuildOptions) -> Result<Self> {
        if records.is_empty() {
            return Err(MerkleError::EmptyTree);
        }
        let schema = &opts.schema;
        let hashed: Vec<Digest> = records.par_iter().map(|r| schema.leaf(r)).collect();

        let mut order: Vec<usize> = (0..records.len()).collect();
        if opts.sort_leaves {
            order.sort_by(|&a, &b| hashed[a].cmp(&hashed[b]).then(a.cmp(&b)));
        }
        let mut positions = vec![0usize; records.len()];
        for (pos, &idx) in order.iter().enumerate() {
            positions[idx] = pos;
        }
        let leaves: Vec<Digest> = order.iter().map(|&i| hashed[i]).collect();
        let layers = build_layers(leaves);

        let tree = Self {
            schema: schema.clone(),
            sort_leaves: opts.sort_leaves,
            records: records.to_vec(),
            positions,
            layers,
        };
        debug!(
            leaves = tree.len(),
            depth = tree.depth(),
            sorted = tree.sort_leaves,
            root = %to_hex(&tree.root()),
            "built merkle tree"
        );
        Ok(tree)
    }

    /// Reassemble a tree from stored parts, checking every structural
    /// invariant: positions form a permutation, each leaf matches its record,
    /// sorted trees have ascending leaves, and every internal node is the
    /// pair hash of its children.
    pub fn from_parts(
        schema: LeafSchema,
        sort_leaves: bool,
        records: Vec<EligibilityRecord>,
        positions: Vec<usize>,
        layers: Vec<Vec<Digest>>,
    ) -> Result<Self> {
        let n = records.len();
        if n == 0 {
            return Err(MerkleError::EmptyTree);
        }
        let inconsistent = |msg: String| MerkleError::Inconsistent(msg);
        if positions.len() != n {
            return Err(inconsistent(format!("{} records but {} leaf positions", n, positions.len())));
        }
        let leaves = layers.first().ok_or_else(|| inconsistent("no layers".into()))?;
        if leaves.len() != n {
            return Err(inconsistent(format!("{} records but {} leaves", n, leaves.len())));
        }
        let mut seen = vec![false; n];
        for &p in &positions {
            if p >= n || std::mem::replace(&mut seen[p], true) {
                return Err(inconsistent(format!("leaf position {p} is out of range or reused")));
            }
        }
        for (i, (r, &p)) in records.iter().zip(&positions).enumerate() {
            if schema.leaf(r) != leaves[p] {
                return Err(inconsistent(format!("leaf at position {p} does not match record {i}")));
            }
        }
        if sort_leaves && leaves.windows(2).any(|w| w[0] > w[1]) {
            return Err(inconsistent("leaves are not sorted".into()));
        }

        let expected = build_layers(leaves.clone());
        if expected.len() != layers.len() {
            return Err(inconsistent(format!("expected {} layers, found {}", expected.len(), layers.len())));
        }
        for (depth, (want, got)) in expected.iter().zip(&layers).enumerate() {
            if want != got {
                return Err(inconsistent(format!("layer {depth} does not match its children")));
            }
        }

        Ok(Self { schema, sort_leaves, records, positions, layers })
    }

    pub fn root(&self) -> Digest {
        self.layers[self.layers.len() - 1][0]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false: construction rejects empty input.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of hashing levels above the leaves.
    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    pub fn schema(&self) -> &LeafSchema {
        &self.schema
    }

    pub fn sort_leaves(&self) -> bool {
        self.sort_leaves
    }

    pub fn records(&self) -> &[EligibilityRecord] {
        &self.records
    }

    pub fn layers(&self) -> &[Vec<Digest>] {
        &self.layers
    }

    /// Leaf position of record `index` in the bottom layer.
    pub fn leaf_position(&self, index: usize) -> Result<usize> {
        self.positions
            .get(index)
            .copied()
            .ok_or(MerkleError::IndexOutOfRange { index, len: self.len() })
    }

    /// Leaf positions of all records, in record order.
    pub fn leaf_positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn leaf(&self, index: usize) -> Result<Digest> {
        Ok(self.layers[0][self.leaf_position(index)?])
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, &EligibilityRecord)> + '_ {
        self.records.iter().enumerate()
    }

    /// Index of the first record equal to `record`.
    pub fn index_of(&self, record: &EligibilityRecord) -> Option<usize> {
        self.records.iter().position(|r| r == record)
    }

    pub fn proof(&self, index: usize) -> Result<Proof> {
        Ok(self.open(self.leaf_position(index)?))
    }

    pub fn proof_for(&self, record: &EligibilityRecord) -> Result<Proof> {
        let index = self
            .index_of(record)
            .ok_or_else(|| MerkleError::RecordNotFound(record.to_string()))?;
        self.proof(index)
    }

    /// Proofs for every record, in record order.
    pub fn proofs(&self) -> Vec<Proof> {
        self.positions.par_iter().map(|&pos| self.open(pos)).collect()
    }

    pub fn verify(&self, index: usize, proof: &[Digest]) -> Result<bool> {
        let record = self
            .records
            .get(index)
            .ok_or(MerkleError::IndexOutOfRange { index, len: self.len() })?;
        Ok(verify_with(&self.schema, record, proof, &self.root()))
    }

    fn open(&self, mut pos: usize) -> Proof {
        let mut path = Vec::with_capacity(self.depth());
        for layer in &self.layers[..self.depth()] {
            // A promoted trailing node has no sibling at this level.
            if let Some(sib) = layer.get(pos ^ 1) {
                path.push(*sib);
            }
            pos >>= 1;
        }
        path
    }

    /// Text drawing of the tree, root first. Nodes are labelled `layer.pos`
    /// with layer 0 at the leaves.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_node(self.depth(), 0, "", "", &mut out);
        out
    }

    fn render_node(&self, layer: usize, pos: usize, lead: &str, child_lead: &str, out: &mut String) {
        let _ = writeln!(out, "{lead}{layer}.{pos}) {}", to_hex(&self.layers[layer][pos]));
        if layer == 0 {
            return;
        }
        let below = self.layers[layer - 1].len();
        let kids: Vec<usize> = [2 * pos, 2 * pos + 1].into_iter().filter(|&c| c < below).collect();
        for (i, &c) in kids.iter().enumerate() {
            let (branch, rest) = if i + 1 == kids.len() { ("└─ ", "   ") } else { ("├─ ", "│  ") };
            self.render_node(
                layer - 1,
                c,
                &format!("{child_lead}{branch}"),
                &format!("{child_lead}{rest}"),
                out,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apedrop_leaf::{LeafField, U256};

    const HUNDRED_ETH: &str = "100000000000000000000";

    fn rec(a: &str, n: &str) -> EligibilityRecord {
        EligibilityRecord::parse(a, n).unwrap()
    }

    fn five() -> Vec<EligibilityRecord> {
        (1..=5u64)
            .map(|i| rec(&format!("0x{}", format!("{i:x}").repeat(40)), &(1000 * i).to_string()))
            .collect()
    }

    fn apes() -> Vec<EligibilityRecord> {
        vec![
            rec("0x76C1cFe708ED1d2FF2073490727f3301117767e9", HUNDRED_ETH),
            rec("0x6b4DF334368b09f87B3722449703060EEf284126", HUNDRED_ETH),
            rec("0xBC4CA0EdA7647A8aB7C2061c2E118A18a936f13D", HUNDRED_ETH),
        ]
    }

    #[test]
    fn two_leaf_root_matches_published_vector() {
        let records = vec![
            rec("0x1111111111111111111111111111111111111111", "5000000000000000000"),
            rec("0x2222222222222222222222222222222222222222", "2500000000000000000"),
        ];
        let mt = MerkleTree::build(&records).unwrap();
        assert_eq!(
            to_hex(&mt.root()),
            "0xd4dee0beab2d53f2cc83e567171bd2820e49898130a22622b10ead383e90bd77"
        );
    }

    #[test]
    fn odd_leaf_is_promoted_not_duplicated() {
        let records = apes();
        let mt = MerkleTree::build(&records).unwrap();
        let sizes: Vec<usize> = mt.layers().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 2, 1]);
        assert_eq!(mt.layers()[1][1], mt.leaf(2).unwrap());
        assert_eq!(
            to_hex(&mt.root()),
            "0xfee823785d01ab902f84d61e28df53dc5440ef225e6b4bcca1b7a20e5265e4bd"
        );

        let proof = mt.proof(2).unwrap();
        assert_eq!(proof, vec![mt.layers()[1][0]]);
        assert!(verify(&records[2], &proof, &mt.root()));
    }

    #[test]
    fn promotion_across_several_layers() {
        let records = five();
        let mt = MerkleTree::build(&records).unwrap();
        let sizes: Vec<usize> = mt.layers().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![5, 3, 2, 1]);
        assert_eq!(
            to_hex(&mt.root()),
            "0x1b60dfd94039618d7fe89ac85e1861b3e8542d3e9bb663bc6e18c00ba52ed3a2"
        );
        assert_eq!(mt.proof(4).unwrap().len(), 1);
        assert_eq!(mt.proof(0).unwrap().len(), 3);
    }

    #[test]
    fn merkle_inclusion_first_middle_last() {
        for n in 1..=17u64 {
            let records: Vec<_> = (0..n)
                .map(|i| EligibilityRecord::new([i as u8 + 1; 20].into(), U256::from(i * 7 + 1)))
                .collect();
            let mt = MerkleTree::build(&records).unwrap();
            let max_len = (n as f64).log2().ceil() as usize;
            for (i, r) in records.iter().enumerate() {
                let path = mt.proof(i).unwrap();
                assert!(path.len() <= max_len, "n={n} i={i}");
                assert!(verify(r, &path, &mt.root()), "n={n} i={i}");
                assert!(mt.verify(i, &path).unwrap());
            }
        }
    }

    #[test]
    fn single_record_has_empty_proof() {
        let r = rec("0x76c1cfe708ed1d2ff2073490727f3301117767e9", "100");
        let mt = MerkleTree::build(&[r]).unwrap();
        assert_eq!(mt.depth(), 0);
        assert_eq!(mt.root(), LeafSchema::airdrop().leaf(&r));
        let proof = mt.proof(0).unwrap();
        assert!(proof.is_empty());
        assert!(verify(&r, &proof, &mt.root()));
    }

    #[test]
    fn merkle_rejects_tampered_leaf_or_path() {
        let records = five();
        let mt = MerkleTree::build(&records).unwrap();
        let root = mt.root();
        let idx = 2;
        let path = mt.proof(idx).unwrap();

        let mut wrong_amount = records[idx];
        wrong_amount.amount += U256::from(1u64);
        assert!(!verify(&wrong_amount, &path, &root));

        let mut wrong_address = records[idx];
        wrong_address.address = records[3].address;
        assert!(!verify(&wrong_address, &path, &root));

        // another record's proof
        assert!(!verify(&records[idx], &mt.proof(3).unwrap(), &root));
        // wrong schema
        let swapped = LeafSchema::new(vec![LeafField::Amount, LeafField::Address]).unwrap();
        assert!(!verify_with(&swapped, &records[idx], &path, &root));
    }

    #[test]
    fn every_single_bit_flip_breaks_the_proof() {
        let records = five();
        let mt = MerkleTree::build(&records).unwrap();
        let root = mt.root();
        for (i, r) in records.iter().enumerate() {
            let proof = mt.proof(i).unwrap();
            for elem in 0..proof.len() {
                for bit in 0..256 {
                    let mut bad = proof.clone();
                    bad[elem][bit / 8] ^= 1 << (bit % 8);
                    assert!(!verify(r, &bad, &root), "record {i} elem {elem} bit {bit}");
                }
            }
        }
    }

    #[test]
    fn reordering_proof_elements_fails() {
        let records = five();
        let mt = MerkleTree::build(&records).unwrap();
        let mut proof = mt.proof(0).unwrap();
        proof.reverse();
        assert!(!verify(&records[0], &proof, &mt.root()));
    }

    #[test]
    fn build_is_deterministic() {
        let records = five();
        let a = MerkleTree::build(&records).unwrap();
        let b = MerkleTree::build(&records).unwrap();
        assert_eq!(a.root(), b.root());
        assert_eq!(a.proofs(), b.proofs());
        assert_eq!(a, b);
    }

    #[test]
    fn sorted_leaves_keep_record_order() {
        let records = five();
        let opts = BuildOptions { sort_leaves: true, ..Default::default() };
        let mt = MerkleTree::build_with(&records, &opts).unwrap();
        assert!(mt.layers()[0].windows(2).all(|w| w[0] <= w[1]));
        // first record has the largest leaf of the five
        assert_eq!(mt.leaf_position(0).unwrap(), 4);
        assert_ne!(mt.root(), MerkleTree::build(&records).unwrap().root());
        assert_eq!(mt.records(), &records[..]);
        for (i, r) in mt.entries() {
            assert_eq!(mt.leaf(i).unwrap(), LeafSchema::airdrop().leaf(r));
            assert!(verify(r, &mt.proof(i).unwrap(), &mt.root()));
        }
    }

    #[test]
    fn empty_input_and_bad_index_are_errors() {
        assert_eq!(MerkleTree::build(&[]).unwrap_err(), MerkleError::EmptyTree);
        let mt = MerkleTree::build(&apes()).unwrap();
        assert_eq!(mt.proof(3).unwrap_err(), MerkleError::IndexOutOfRange { index: 3, len: 3 });
        assert!(mt.verify(9, &[]).is_err());
    }

    #[test]
    fn duplicate_records_are_independent_leaves() {
        let mut records = apes();
        records.push(records[1]);
        let mt = MerkleTree::build(&records).unwrap();
        assert_eq!(mt.len(), 4);
        assert_eq!(mt.leaf(1).unwrap(), mt.leaf(3).unwrap());
        assert!(mt.verify(3, &mt.proof(3).unwrap()).unwrap());
        assert_eq!(mt.proof_for(&records[1]).unwrap(), mt.proof(1).unwrap());
    }

    #[test]
    fn proof_for_unknown_record() {
        let mt = MerkleTree::build(&apes()).unwrap();
        let stranger = rec("0x1111111111111111111111111111111111111111", "1");
        assert!(matches!(mt.proof_for(&stranger), Err(MerkleError::RecordNotFound(_))));
    }

    #[test]
    fn parallel_proofs_match_single_proofs() {
        let mt = MerkleTree::build(&five()).unwrap();
        let all = mt.proofs();
        assert_eq!(all.len(), 5);
        for (i, p) in all.iter().enumerate() {
            assert_eq!(p, &mt.proof(i).unwrap());
        }
    }

    #[test]
    fn from_parts_accepts_own_parts_and_rejects_tampering() {
        let mt = MerkleTree::build(&five()).unwrap();
        let parts = || {
            (
                mt.schema().clone(),
                mt.sort_leaves(),
                mt.records().to_vec(),
                mt.leaf_positions().to_vec(),
                mt.layers().to_vec(),
            )
        };

        let (s, o, r, p, l) = parts();
        assert_eq!(MerkleTree::from_parts(s, o, r, p, l).unwrap(), mt);

        let (s, o, r, p, mut l) = parts();
        l[1][0][0] ^= 1;
        assert!(matches!(MerkleTree::from_parts(s, o, r, p, l), Err(MerkleError::Inconsistent(_))));

        let (s, o, mut r, p, l) = parts();
        r[0].amount = U256::from(1u64);
        assert!(matches!(MerkleTree::from_parts(s, o, r, p, l), Err(MerkleError::Inconsistent(_))));

        let (s, o, r, mut p, l) = parts();
        p[1] = p[0];
        assert!(matches!(MerkleTree::from_parts(s, o, r, p, l), Err(MerkleError::Inconsistent(_))));

        let (s, o, r, p, mut l) = parts();
        l.pop();
        assert!(matches!(MerkleTree::from_parts(s, o, r, p, l), Err(MerkleError::Inconsistent(_))));

        let (s, _, r, p, l) = parts();
        assert!(matches!(MerkleTree::from_parts(s, true, r, p, l), Err(MerkleError::Inconsistent(_))));
    }

    #[test]
    fn render_draws_every_node() {
        let mt = MerkleTree::build(&apes()).unwrap();
        let text = mt.render();
        assert!(text.starts_with(&format!("2.0) {}", to_hex(&mt.root()))));
        assert_eq!(text.lines().count(), 3 + 2 + 1);
        assert!(text.contains("└─ 1.1) "));
    }
}
