use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cas",
    about = "Content-addressed blob store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Backend selection. `--config` wins over the shorthand flags.
#[derive(Args, Debug, Default)]
pub struct StoreArgs {
    /// TOML file describing the backend
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Root directory of a disk store
    #[arg(long, global = true, conflicts_with = "mapped")]
    pub root: Option<PathBuf>,

    /// File backing a memory-mapped store
    #[arg(long, global = true)]
    pub mapped: Option<PathBuf>,

    /// Size of the memory-mapped file, in bytes
    #[arg(long, global = true, requires = "mapped")]
    pub capacity: Option<u64>,

    /// Account whose store to use
    #[arg(short, long, global = true, default_value_t = 0, allow_negative_numbers = true)]
    pub account: i64,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store files (or standard input) and print their hashes
    Put(PutArgs),
    /// Write a blob to standard output or a file
    Get(GetArgs),
    /// Show whether blobs exist, and their sizes
    Stat(StatArgs),
    /// Delete blobs from a disk store
    Rm(RmArgs),
    /// Drop records at or past an offset of a memory-mapped store
    Truncate(TruncateArgs),
    /// Hash files without storing them
    Hash(HashArgs),
    /// Print the effective store configuration
    Config,
}

#[derive(Args)]
pub struct PutArgs {
    /// Files to store; standard input when empty
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct GetArgs {
    pub hash: String,
    /// Write here instead of standard output
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct StatArgs {
    #[arg(required = true)]
    pub hashes: Vec<String>,
}

#[derive(Args)]
pub struct RmArgs {
    #[arg(required = true)]
    pub hashes: Vec<String>,
}

#[derive(Args)]
pub struct TruncateArgs {
    pub size: u64,
}

#[derive(Args)]
pub struct HashArgs {
    /// Files to hash; standard input when empty
    pub paths: Vec<PathBuf>,
    /// Also print the base64 form used by Content-MD5 headers
    #[arg(long)]
    pub base64: bool,
}
