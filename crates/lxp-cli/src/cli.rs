use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lxp", about = "Inspect and maintain an LXP tuple store", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store root directory
    #[arg(long, global = true, conflicts_with = "config")]
    pub root: Option<PathBuf>,

    /// TOML store configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// List repositories
    Repos,
    /// List the buckets of a repository
    Buckets(BucketsArgs),
    /// List the oids in a bucket
    Ls(LsArgs),
    /// Print one tuple
    Get(GetArgs),
    /// Look tuples up through a secondary index
    Find(FindArgs),
    /// Discard leftover transaction data in a bucket
    Tidy(BucketArgs),
    /// List registered types
    Types,
}

#[derive(Args)]
pub struct BucketsArgs {
    pub repository: String,
}

#[derive(Args)]
pub struct BucketArgs {
    pub repository: String,
    pub bucket: String,
}

#[derive(Args)]
pub struct LsArgs {
    pub repository: String,
    pub bucket: String,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct GetArgs {
    pub repository: String,
    pub bucket: String,
    pub oid: String,
}

#[derive(Args)]
pub struct FindArgs {
    pub repository: String,
    pub bucket: String,
    pub label: String,
    pub value: String,
}
