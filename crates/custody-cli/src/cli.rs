use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "custody",
    about = "Tamper-evident custody chain for published election results",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Config file (defaults to ./custody.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Link log path, overriding [chain].log_path
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate an operator signing key pair
    Keygen(KeygenArgs),
    /// Append a link to the chain
    Append(AppendArgs),
    /// Sign every unsigned link in the log
    Sign(SignArgs),
    /// Compute the Merkle root of a range of links
    BatchRoot(BatchRootArgs),
    /// Produce an inclusion proof for one link in a batch
    Proof(ProofArgs),
    /// Verify chain, anchors and signatures
    Verify(VerifyArgs),
}

#[derive(Args)]
pub struct KeygenArgs {
    #[arg(long)]
    pub signer_id: Option<String>,
    #[arg(long)]
    pub key_dir: Option<PathBuf>,
    /// Replace an existing key pair
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct AppendArgs {
    /// JSON file holding tagged link content
    #[arg(long, conflicts_with = "raw", required_unless_present = "raw")]
    pub content: Option<PathBuf>,
    /// Arbitrary file stored as opaque content
    #[arg(long)]
    pub raw: Option<PathBuf>,
    #[arg(long, requires = "raw")]
    pub media_type: Option<String>,
    /// Sign the link with the operator key before writing it
    #[arg(long)]
    pub sign: bool,
}

#[derive(Args)]
pub struct SignArgs {
    #[arg(long)]
    pub signer_id: Option<String>,
    #[arg(long)]
    pub key_dir: Option<PathBuf>,
}

#[derive(Args, Clone, Copy)]
pub struct RangeArgs {
    /// First sequence (default: 0)
    #[arg(long)]
    pub from: Option<u64>,
    /// Last sequence, inclusive (default: chain tail)
    #[arg(long)]
    pub to: Option<u64>,
}

#[derive(Args)]
pub struct BatchRootArgs {
    #[command(flatten)]
    pub range: RangeArgs,
    /// Record the anchoring transaction for this batch in the anchor log
    #[arg(long)]
    pub anchor_tx: Option<String>,
}

#[derive(Args)]
pub struct ProofArgs {
    /// Sequence of the link to prove
    pub sequence: u64,
    #[command(flatten)]
    pub range: RangeArgs,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Check anchor records against the ledger
    #[arg(long)]
    pub anchors: bool,
    /// JSON export of ledger commitments
    #[arg(long)]
    pub ledger: Option<PathBuf>,
    /// Treat unsigned links as failures
    #[arg(long)]
    pub require_signatures: bool,
    #[arg(long)]
    pub skip_signatures: bool,
    #[arg(long)]
    pub max_anchor_checks: Option<usize>,
    /// Accepted signer public key (hex); repeatable
    #[arg(long = "trusted-key")]
    pub trusted_keys: Vec<String>,
    /// Overall budget for anchor checks, in seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}
