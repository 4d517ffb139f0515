use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use docvault_crypto::MasterKey;
use docvault_store::{DocumentStore, EnvelopeMode, FileMedium, Reseal, StoreConfig, MASTER_KEY_ENV};
use docvault_types::StorageKey;
use serde_json::Value;
use tracing::debug;

use crate::cli::*;

/// An opened data directory.
struct Vault {
    medium: FileMedium,
    store: DocumentStore,
}

impl Vault {
    async fn open(data_dir: &Path, config: StoreConfig, master_key: Option<MasterKey>) -> anyhow::Result<Self> {
        let medium = FileMedium::open(data_dir)
            .await
            .with_context(|| format!("cannot open data directory {}", data_dir.display()))?;
        let store = DocumentStore::open(Arc::new(medium.clone()), master_key, config)?;
        Ok(Self { medium, store })
    }
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    if let Command::Keygen = cli.command {
        return cmd_keygen();
    }

    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    let master_key = MasterKey::from_env(MASTER_KEY_ENV);
    debug!(encrypted = master_key.is_some(), data_dir = %cli.data_dir.display(), "opening vault");
    let vault = Vault::open(&cli.data_dir, config, master_key).await?;

    match cli.command {
        Command::Keygen => Ok(()),
        Command::Put(args) => cmd_put(&vault, args).await,
        Command::Get(args) => cmd_get(&vault, args).await,
        Command::Rm(args) => cmd_rm(&vault, args).await,
        Command::Inspect(args) => cmd_inspect(&vault, args).await,
        Command::Verify => cmd_verify(&vault).await,
        Command::Migrate(args) => cmd_migrate(&vault, args).await,
    }
}

fn cmd_keygen() -> anyhow::Result<()> {
    let key = MasterKey::generate();
    println!("{}", key.to_hex());
    eprintln!("{} export {}=<key> to enable encryption", "hint:".cyan(), MASTER_KEY_ENV);
    Ok(())
}

fn parse_key(key: &str) -> anyhow::Result<StorageKey> {
    StorageKey::parse(key).with_context(|| format!("invalid key {key:?}"))
}

async fn cmd_put(vault: &Vault, args: PutArgs) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    let document: Value = serde_json::from_str(&args.json).context("document is not valid JSON")?;
    vault.store.put(&key, &document).await?;
    let mode = if vault.store.is_encrypted() { "encrypted" } else { "plaintext" };
    println!("{} Stored {} ({})", "✓".green().bold(), key.to_string().yellow(), mode);
    Ok(())
}

async fn cmd_get(vault: &Vault, args: KeyArgs) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    match vault.store.get::<Value>(&key).await? {
        Some(document) => {
            println!("{}", serde_json::to_string_pretty(&document)?);
            Ok(())
        }
        None => bail!("no document at {key}"),
    }
}

async fn cmd_rm(vault: &Vault, args: KeyArgs) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    if vault.store.remove(&key).await? {
        println!("{} Removed {}", "✓".green().bold(), key.to_string().yellow());
    } else {
        println!("Nothing stored at {}", key.to_string().yellow());
    }
    Ok(())
}

async fn cmd_inspect(vault: &Vault, args: KeyArgs) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    println!("Record {}", key.to_string().yellow().bold());
    match vault.store.envelope_mode(&key).await {
        Ok(None) => println!("  Status: {}", "absent".dimmed()),
        Ok(Some(mode)) => {
            println!("  Integrity: {}", "valid".green());
            println!("  Envelope: {}", mode_label(mode));
            let readable = vault.store.get::<Value>(&key).await.is_ok();
            let label = if readable { "ok".green() } else { "failed".red() };
            println!("  Decryption: {label}");
        }
        Err(e) => println!("  Integrity: {} ({e})", "FAILED".red().bold()),
    }
    Ok(())
}

async fn cmd_verify(vault: &Vault) -> anyhow::Result<()> {
    let report = verify(vault).await?;
    for (key, reason) in &report.failures {
        println!("  {} {}: {}", "✗".red().bold(), key.yellow(), reason);
    }
    if !report.failures.is_empty() {
        bail!("{} of {} records failed verification", report.failures.len(), report.checked);
    }
    println!("{} {} records verified", "✓".green().bold(), report.checked);
    Ok(())
}

async fn cmd_migrate(vault: &Vault, args: MigrateArgs) -> anyhow::Result<()> {
    if !vault.store.is_encrypted() {
        bail!("set {MASTER_KEY_ENV} to migrate records to encrypted form");
    }
    let report = migrate(vault, args.dry_run).await?;
    for (key, reason) in &report.failures {
        println!("  {} {}: {}", "✗".red().bold(), key.yellow(), reason);
    }
    let verb = if args.dry_run { "would encrypt" } else { "encrypted" };
    println!(
        "{} {} {} records, {} already encrypted",
        "✓".green().bold(),
        verb,
        report.converted,
        report.unchanged
    );
    if !report.failures.is_empty() {
        bail!("{} records could not be migrated", report.failures.len());
    }
    Ok(())
}

fn mode_label(mode: EnvelopeMode) -> colored::ColoredString {
    match mode {
        EnvelopeMode::Encrypted => "encrypted".green(),
        EnvelopeMode::Plaintext => "plaintext".yellow(),
    }
}

#[derive(Debug, Default)]
struct VerifyReport {
    checked: usize,
    failures: Vec<(String, String)>,
}

/// Decode every record in the data directory.
async fn verify(vault: &Vault) -> anyhow::Result<VerifyReport> {
    let mut report = VerifyReport::default();
    for canonical in vault.medium.keys()? {
        report.checked += 1;
        let outcome = match StorageKey::parse(&canonical) {
            Ok(key) => vault.store.get::<Value>(&key).await.map(|_| ()).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = outcome {
            report.failures.push((canonical, reason));
        }
    }
    Ok(report)
}

#[derive(Debug, Default)]
struct MigrateReport {
    converted: usize,
    unchanged: usize,
    failures: Vec<(String, String)>,
}

/// Reseal every record in the data directory with the store's key.
async fn migrate(vault: &Vault, dry_run: bool) -> anyhow::Result<MigrateReport> {
    let mut report = MigrateReport::default();
    for canonical in vault.medium.keys()? {
        let key = match StorageKey::parse(&canonical) {
            Ok(key) => key,
            Err(e) => {
                report.failures.push((canonical, e.to_string()));
                continue;
            }
        };
        let outcome = if dry_run {
            vault.store.envelope_mode(&key).await.map(|mode| match mode {
                Some(EnvelopeMode::Plaintext) => Reseal::Converted {
                    from: EnvelopeMode::Plaintext,
                    to: EnvelopeMode::Encrypted,
                },
                Some(mode) => Reseal::Unchanged(mode),
                None => Reseal::Missing,
            })
        } else {
            vault.store.reseal(&key).await
        };
        match outcome {
            Ok(Reseal::Converted { .. }) => report.converted += 1,
            Ok(Reseal::Unchanged(_)) => report.unchanged += 1,
            Ok(Reseal::Missing) => {}
            Err(e) => report.failures.push((canonical, e.to_string())),
        }
    }
    Ok(report)
}
