use std::path::PathBuf;

use apedrop_leaf::{LeafError, LeafSchema};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Params {
    /// ABI types of the leaf fields, in encoding order (e.g. `["address", "uint256"]`)
    pub leaf_encoding: Option<Vec<String>>,
    /// Order leaves by digest before building layers
    pub sort_leaves: Option<bool>,
    /// Eligibility list, one `address,amount` per line
    pub input: Option<PathBuf>,
    /// Where to write the tree dump
    pub tree_out: Option<PathBuf>,
    /// Where to write the address -> proof map
    pub proofs_out: Option<PathBuf>,
}

impl Params {
    /// Leaf schema named by `leaf_encoding`, or the default airdrop layout.
    pub fn schema(&self) -> Result<LeafSchema, LeafError> {
        match &self.leaf_encoding {
            Some(types) => LeafSchema::from_abi_types(types.as_slice()),
            None => Ok(LeafSchema::airdrop()),
        }
    }
}

/// Parse tree-building parameters from TOML text
pub fn load_params_toml(input: &str) -> Result<Params, toml::de::Error> {
    toml::from_str::<Params>(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apedrop_leaf::LeafField;

    #[test]
    fn empty_file_is_all_defaults() {
        let p = load_params_toml("").unwrap();
        assert_eq!(p, Params::default());
        assert_eq!(p.schema().unwrap(), LeafSchema::airdrop());
    }

    #[test]
    fn full_file() {
        let p = load_params_toml(
            r#"
            leaf_encoding = ["uint256", "address"]
            sort_leaves = true
            input = "scripts/airdrop.csv"
            tree_out = "scripts/merkleTree.json"
            proofs_out = "scripts/proofs.json"
            "#,
        )
        .unwrap();
        assert_eq!(p.sort_leaves, Some(true));
        assert_eq!(p.input.as_deref(), Some(std::path::Path::new("scripts/airdrop.csv")));
        assert_eq!(p.schema().unwrap().fields(), &[LeafField::Amount, LeafField::Address]);
    }

    #[test]
    fn bad_schema_and_unknown_keys() {
        let p = load_params_toml(r#"leaf_encoding = ["address"]"#).unwrap();
        assert!(p.schema().is_err());
        assert!(load_params_toml("queries = 3").is_err());
        assert!(load_params_toml("sort_leaves = \"yes\"").is_err());
    }
}
