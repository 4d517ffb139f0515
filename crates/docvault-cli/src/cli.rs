use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "docvault",
    about = "docvault: transactional, encrypted-at-rest document store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the records
    #[arg(long, global = true, default_value = ".docvault")]
    pub data_dir: PathBuf,

    /// TOML store configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print a fresh random master key
    Keygen,
    /// Store a JSON document
    Put(PutArgs),
    /// Print a stored document
    Get(KeyArgs),
    /// Remove a stored document
    Rm(KeyArgs),
    /// Show a record's envelope mode and integrity status
    Inspect(KeyArgs),
    /// Check every record's checksum and decryption
    Verify,
    /// Encrypt every plaintext record with the configured master key
    Migrate(MigrateArgs),
}

#[derive(Args)]
pub struct KeyArgs {
    /// Record key, written seg/seg/seg
    pub key: String,
}

#[derive(Args)]
pub struct PutArgs {
    /// Record key, written seg/seg/seg
    pub key: String,
    /// Document as JSON text
    pub json: String,
}

#[derive(Args)]
pub struct MigrateArgs {
    /// Report what would change without writing
    #[arg(long)]
    pub dry_run: bool,
}
