// File: apedrop-cli/src/main.rs
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use apedrop_dump as dump;
use apedrop_hash::{parse_digest, to_hex};
use apedrop_leaf::{parse_address, parse_amount, EligibilityRecord};
use apedrop_merkle::{verify_with, BuildOptions, MerkleTree};
use apedrop_spec as spec;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod ingest;

#[derive(Parser)]
#[command(name = "apedrop", version, about = "Merkle airdrop tree builder and claim checker")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Build the tree from an eligibility list, write the dump and the proof map
    Build {
        /// `address,amount` lines [default: airdrop.csv]
        #[arg(long)]
        input: Option<PathBuf>,
        /// [default: merkleTree.json]
        #[arg(long)]
        tree_out: Option<PathBuf>,
        /// [default: proofs.json]
        #[arg(long)]
        proofs_out: Option<PathBuf>,
        /// Order leaves by digest before layering
        #[arg(long)]
        sort_leaves: bool,
        /// Optional params file (toml); its values win over flags
        #[arg(long)]
        params: Option<PathBuf>,
    },
    /// Print the root of a saved tree
    Root {
        #[arg(long, default_value = "merkleTree.json")]
        tree: PathBuf,
    },
    /// Print the proof for an address in a saved tree
    Prove {
        #[arg(long, default_value = "merkleTree.json")]
        tree: PathBuf,
        #[arg(long)]
        address: String,
        /// Pick the entry with this amount when an address appears twice
        #[arg(long)]
        amount: Option<String>,
    },
    /// Check a claim against a published root
    Verify {
        #[arg(long)]
        root: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        amount: String,
        /// Comma separated sibling digests, leaf to root
        #[arg(long, value_delimiter = ',')]
        proof: Vec<String>,
        /// Leaf encoding params (toml); defaults to ["address", "uint256"]
        #[arg(long)]
        params: Option<PathBuf>,
    },
    /// Draw the layers of a saved tree
    Render {
        #[arg(long, default_value = "merkleTree.json")]
        tree: PathBuf,
    },
}

struct BuildPlan {
    input: PathBuf,
    tree_out: PathBuf,
    proofs_out: PathBuf,
    opts: BuildOptions,
}

fn load_params(path: Option<&PathBuf>) -> Result<spec::Params> {
    match path {
        Some(p) => {
            let txt = std::fs::read_to_string(p).with_context(|| format!("failed to read {}", p.display()))?;
            spec::load_params_toml(&txt).with_context(|| format!("failed to parse {}", p.display()))
        }
        None => Ok(spec::Params::default()),
    }
}

fn plan_build(
    input: Option<PathBuf>,
    tree_out: Option<PathBuf>,
    proofs_out: Option<PathBuf>,
    sort_leaves: bool,
    params: spec::Params,
) -> Result<BuildPlan> {
    let schema = params.schema().context("invalid leaf_encoding")?;
    Ok(BuildPlan {
        input: params.input.or(input).unwrap_or_else(|| "airdrop.csv".into()),
        tree_out: params.tree_out.or(tree_out).unwrap_or_else(|| "merkleTree.json".into()),
        proofs_out: params.proofs_out.or(proofs_out).unwrap_or_else(|| "proofs.json".into()),
        opts: BuildOptions { schema, sort_leaves: params.sort_leaves.unwrap_or(sort_leaves) },
    })
}

fn run_build(plan: BuildPlan, out: &mut impl Write) -> Result<()> {
    let records = ingest::read_records(&plan.input)?;
    let tree = MerkleTree::build_with(&records, &plan.opts)?;
    info!(leaves = tree.len(), depth = tree.depth(), schema = %tree.schema(), "tree built");

    let proofs = dump::proof_map(&tree);
    dump::save_tree(&plan.tree_out, &tree)?;
    dump::save_proofs(&plan.proofs_out, &proofs)?;
    info!(
        tree = %plan.tree_out.display(),
        proofs = %plan.proofs_out.display(),
        entries = proofs.len(),
        "merkle tree and proofs saved"
    );
    writeln!(out, "{}", to_hex(&tree.root()))?;
    Ok(())
}

/// Prints the proof of the last matching record, the one the proof map keeps.
fn run_prove(tree: PathBuf, address: &str, amount: Option<&str>, out: &mut impl Write) -> Result<()> {
    let tree = dump::load_tree(&tree)?;
    let address = parse_address(address)?;
    let amount = amount.map(parse_amount).transpose()?;
    let Some((index, record)) = tree
        .entries()
        .filter(|(_, r)| r.address == address && amount.map_or(true, |a| r.amount == a))
        .last()
    else {
        bail!("{} is not in the tree", address.to_checksum(None));
    };
    let proof = tree.proof(index)?;
    let json = serde_json::json!({
        "address": record.checksummed(),
        "amount": record.amount.to_string(),
        "leaf": to_hex(&tree.leaf(index)?),
        "proof": proof.iter().map(to_hex).collect::<Vec<_>>(),
    });
    writeln!(out, "{}", serde_json::to_string_pretty(&json)?)?;
    Ok(())
}

fn run_verify(root: &str, address: &str, amount: &str, proof: &[String], params: spec::Params) -> Result<bool> {
    let schema = params.schema().context("invalid leaf_encoding")?;
    let root = parse_digest(root).context("invalid root")?;
    let record = EligibilityRecord::parse(address, amount)?;
    let proof = proof
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| parse_digest(p).with_context(|| format!("invalid proof element {p:?}")))
        .collect::<Result<Vec<_>>>()?;
    let ok = verify_with(&schema, &record, &proof, &root);
    info!(%record, proof_len = proof.len(), ok, "claim checked");
    Ok(ok)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cmd: Cmd, out: &mut impl Write) -> Result<ExitCode> {
    match cmd {
        Cmd::Build { input, tree_out, proofs_out, sort_leaves, params } => {
            let params = load_params(params.as_ref())?;
            run_build(plan_build(input, tree_out, proofs_out, sort_leaves, params)?, out)?;
        }
        Cmd::Root { tree } => {
            let tree = dump::load_tree(&tree)?;
            writeln!(out, "{}", to_hex(&tree.root()))?;
        }
        Cmd::Prove { tree, address, amount } => {
            run_prove(tree, &address, amount.as_deref(), out)?;
        }
        Cmd::Verify { root, address, amount, proof, params } => {
            let params = load_params(params.as_ref())?;
            let ok = run_verify(&root, &address, &amount, &proof, params)?;
            writeln!(out, "{}", if ok { "valid" } else { "invalid" })?;
            if !ok {
                return Ok(ExitCode::FAILURE);
            }
        }
        Cmd::Render { tree } => {
            let tree = dump::load_tree(&tree)?;
            write!(out, "{}", tree.render())?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    run(cli.cmd, &mut std::io::stdout().lock())
}
