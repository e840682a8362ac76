//! pvault: local secure photo vault CLI
//!
//! Vault commands:
//!   init                      - create or load the master key, sweep stale views
//!   status                    - show vault phase, versions and photo count
//!   verify [--deep]           - round-trip the secure storage (and audit blobs)
//!   upgrade <version>         - move to a new key version, re-encrypting photos
//!   consent <grant|revoke>    - record the consent flag
//!
//! Photo commands:
//!   capture <file>            - encrypt a photo into the vault
//!   view <id> [--out <file>]  - decrypt a photo for viewing
//!   list                      - list catalogued photos
//!   delete <id> [--secure]    - delete a photo (optionally overwrite first)
//!
//! Data management:
//!   export [--out <file>]     - portable export without secrets
//!   wipe --yes                - erase all keys, photos and state
//!   clear-cache               - remove decrypted view files
//!   config show               - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncBufReadExt;
use zeroize::Zeroizing;

use pvault_core::types::now_epoch;
use pvault_core::{PhotoMetadata, PvaultConfig};
use pvault_vault::{LifecycleEvent, UpgradeOutcome, VaultController};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "pvault",
    version,
    about = "Local secure photo vault",
    long_about = "pvault: device-bound encryption, viewing, export and secure wipe of private photos"
)]
struct Cli {
    /// Path to pvault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "PVAULT_CONFIG",
        default_value = "~/.config/pvault/pvault.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "PVAULT_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "PVAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or load the master key and bring the vault to Ready
    Init,

    /// Show vault phase, encryption version and photo count
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Round-trip test of the secure key storage
    Verify {
        /// Also authenticate every stored photo (no plaintext is written)
        #[arg(long)]
        deep: bool,
    },

    /// Encrypt a photo file into the vault
    Capture {
        /// Photo file to encrypt
        file: PathBuf,
        /// Category label (e.g. front, side, meal)
        #[arg(long, default_value = "uncategorized")]
        category: String,
        /// Numeric field, repeatable: --field weight_kg=81.4
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, f64)>,
        /// Free-form note
        #[arg(long)]
        note: Option<String>,
        /// Delete the source file after a successful capture
        #[arg(long)]
        remove_source: bool,
    },

    /// Decrypt a photo for viewing
    ///
    /// Without --out the decrypted copy stays in the ephemeral cache until
    /// Enter is pressed, then it is removed.
    View {
        /// Photo id (see `pvault list`)
        id: String,
        /// Copy the decrypted photo to this path instead
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// List catalogued photos
    List,

    /// Delete a photo
    Delete {
        /// Photo id
        id: String,
        /// Overwrite the ciphertext before removing it
        #[arg(long)]
        secure: bool,
    },

    /// Export non-secret vault state and photo metadata as JSON
    Export {
        /// Write to this file instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Erase every key, photo and state file, then start a fresh vault
    Wipe {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },

    /// Remove all decrypted view files
    #[command(name = "clear-cache")]
    ClearCache,

    /// Upgrade to a new key version and re-encrypt stored photos
    Upgrade {
        /// Target encryption version
        version: u32,
    },

    /// Record the user's consent choice
    Consent {
        action: ConsentAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Clone, Debug, ValueEnum)]
enum ConsentAction {
    Grant,
    Revoke,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = pvault_core::config::expand_home(&cli.config);
    let config = PvaultConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "pvault starting"
    );

    match cli.command {
        Commands::Init => cmd_init(&config).await,
        Commands::Status { json } => cmd_status(&config, json).await,
        Commands::Verify { deep } => cmd_verify(&config, deep).await,
        Commands::Capture { file, category, fields, note, remove_source } => {
            cmd_capture(&config, &file, category, fields, note, remove_source).await
        }
        Commands::View { id, out } => cmd_view(&config, &id, out.as_deref()).await,
        Commands::List => cmd_list(&config).await,
        Commands::Delete { id, secure } => cmd_delete(&config, &id, secure).await,
        Commands::Export { out } => cmd_export(&config, out.as_deref()).await,
        Commands::Wipe { yes } => cmd_wipe(&config, yes).await,
        Commands::ClearCache => cmd_clear_cache(&config).await,
        Commands::Upgrade { version } => cmd_upgrade(&config, version).await,
        Commands::Consent { action } => {
            cmd_consent(&config, matches!(action, ConsentAction::Grant)).await
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // logs go to stderr so stdout stays clean for export/status output
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Build the controller from config and bring it to Ready.
async fn open_vault(config: &PvaultConfig) -> Result<VaultController> {
    let vault = VaultController::from_config(config)
        .await
        .context("opening secure storage")?;
    vault.initialize().await.context("initializing vault")?;
    Ok(vault)
}

/// `key=value` with a numeric value, for `--field`.
fn parse_field(raw: &str) -> std::result::Result<(String, f64), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("field name is empty".into());
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("field {key}: {value:?} is not a number"))?;
    Ok((key.to_string(), value))
}

fn format_epoch(secs: u64) -> String {
    let age = now_epoch().saturating_sub(secs);
    match age {
        0..=59 => format!("{secs} ({age}s ago)"),
        60..=3599 => format!("{secs} ({}m ago)", age / 60),
        3600..=86_399 => format!("{secs} ({}h ago)", age / 3600),
        _ => format!("{secs} ({}d ago)", age / 86_400),
    }
}

// ── `pvault init` / `status` / `verify` ─────────────────────────────────────────

async fn cmd_init(config: &PvaultConfig) -> Result<()> {
    let vault = open_vault(config).await?;
    let status = vault.status().await;
    println!("vault ready");
    println!("  encryption version: {}", status.vault_state.encryption_version);
    println!("  secure storage:     {}", status.storage_backend);
    println!("  photos:             {}", status.photo_count);
    Ok(())
}

async fn cmd_status(config: &PvaultConfig, json: bool) -> Result<()> {
    let vault = open_vault(config).await?;
    let status = vault.status().await;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("serializing status")?
        );
        return Ok(());
    }

    let state = &status.vault_state;
    println!("pvault v{}", env!("CARGO_PKG_VERSION"));
    println!("  phase:              {}", status.phase);
    println!("  secure storage:     {}", status.storage_backend);
    println!("  encryption version: {}", state.encryption_version);
    println!(
        "  consent:            {}",
        if state.consent_granted { "granted" } else { "not granted" }
    );
    println!(
        "  last verified:      {}",
        state
            .last_verified_at
            .map(format_epoch)
            .unwrap_or_else(|| "never".into())
    );
    println!("  photos:             {}", status.photo_count);
    Ok(())
}

async fn cmd_verify(config: &PvaultConfig, deep: bool) -> Result<()> {
    let vault = open_vault(config).await?;
    if !vault.verify().await? {
        anyhow::bail!(
            "secure storage verification FAILED\n\
             The vault is in verify_failed; run `pvault init` to recover."
        );
    }
    println!("secure storage: ok");

    if deep {
        let report = vault.audit_photos().await?;
        println!("photos authenticated: {}", report.authenticated);
        for failure in &report.failures {
            println!("  FAILED {}: {}", failure.target, failure.error);
        }
        if !report.failures.is_empty() {
            anyhow::bail!("{} photo(s) failed authentication", report.failures.len());
        }
    }
    Ok(())
}

// ── photo commands ────────────────────────────────────────────────────────────

async fn cmd_capture(
    config: &PvaultConfig,
    file: &Path,
    category: String,
    fields: Vec<(String, f64)>,
    note: Option<String>,
    remove_source: bool,
) -> Result<()> {
    let bytes = Zeroizing::new(
        tokio::fs::read(file)
            .await
            .with_context(|| format!("reading {}", file.display()))?,
    );
    let vault = open_vault(config).await?;
    let metadata = PhotoMetadata {
        category,
        fields: fields.into_iter().collect::<BTreeMap<_, _>>(),
        captured_at: now_epoch(),
        note,
    };

    let record = vault
        .capture_photo(&bytes, metadata)
        .await
        .with_context(|| format!("capturing {}", file.display()))?;
    println!("captured {} ({} bytes)", record.id(), record.blob.plaintext_len);

    if remove_source {
        tokio::fs::remove_file(file)
            .await
            .with_context(|| format!("removing source {}", file.display()))?;
        println!("removed source {}", file.display());
    }
    Ok(())
}

async fn cmd_view(config: &PvaultConfig, id: &str, out: Option<&Path>) -> Result<()> {
    let vault = open_vault(config).await?;
    let view = match vault.view_photo(id).await {
        Ok(view) => view,
        Err(e) if e.is_security_critical() => {
            anyhow::bail!("photo {id} cannot be shown: {e}");
        }
        Err(e) => return Err(e).with_context(|| format!("decrypting photo {id}")),
    };

    match out {
        Some(out) => {
            let copied = tokio::fs::copy(&view.path, out)
                .await
                .with_context(|| format!("writing {}", out.display()));
            vault
                .on_lifecycle(LifecycleEvent::ViewerClosed)
                .await
                .context("ephemeral cleanup task")?;
            copied?;
            println!("wrote {} ({} bytes)", out.display(), view.len);
        }
        None => {
            println!("{}", view.path.display());
            eprintln!("press Enter to close the viewer and remove the decrypted copy");
            let mut line = String::new();
            let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let _ = stdin.read_line(&mut line).await;
            vault
                .on_lifecycle(LifecycleEvent::ViewerClosed)
                .await
                .context("ephemeral cleanup task")?;
        }
    }
    Ok(())
}

async fn cmd_list(config: &PvaultConfig) -> Result<()> {
    let vault = open_vault(config).await?;
    let photos = vault.list_photos().await?;
    if photos.is_empty() {
        println!("no photos");
        return Ok(());
    }
    println!("{:<36}  {:<14}  {:>10}  {:>3}  fields", "id", "category", "bytes", "ver");
    for record in photos {
        let fields = record
            .metadata
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{:<36}  {:<14}  {:>10}  {:>3}  {}",
            record.id(),
            record.metadata.category,
            record.blob.plaintext_len,
            record.blob.key_version,
            fields
        );
    }
    Ok(())
}

async fn cmd_delete(config: &PvaultConfig, id: &str, secure: bool) -> Result<()> {
    let vault = open_vault(config).await?;
    vault
        .delete_photo(id, secure)
        .await
        .with_context(|| format!("deleting photo {id}"))?;
    println!("deleted {id}{}", if secure { " (overwritten)" } else { "" });
    Ok(())
}

// ── data management ───────────────────────────────────────────────────────────

async fn cmd_export(config: &PvaultConfig, out: Option<&Path>) -> Result<()> {
    let vault = open_vault(config).await?;
    let json = vault.export_user_data().await?.to_json_pretty()?;
    match out {
        Some(path) => {
            tokio::fs::write(path, json.as_bytes())
                .await
                .with_context(|| format!("writing export: {}", path.display()))?;
            println!("exported to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_wipe(config: &PvaultConfig, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!(
            "wipe erases every key, photo and state file and cannot be undone\n\
             Re-run with --yes to confirm."
        );
    }
    // no initialize: wiping must work on a vault that refuses to open
    let vault = VaultController::from_config(config)
        .await
        .context("opening secure storage")?;

    let report = vault.wipe_all().await?;
    println!(
        "wiped {} secure entr{} and {} photo file{}",
        report.deleted_entries,
        if report.deleted_entries == 1 { "y" } else { "ies" },
        report.deleted_blobs,
        if report.deleted_blobs == 1 { "" } else { "s" }
    );
    println!("note: overwrite passes are best-effort on flash storage");
    for failure in &report.failures {
        println!("  NOT ERASED {}: {}", failure.target, failure.error);
    }
    match report.partial_failure() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

async fn cmd_clear_cache(config: &PvaultConfig) -> Result<()> {
    let vault = open_vault(config).await?;
    let removed = vault.blobs().cleanup_ephemeral().await?;
    println!("removed {removed} decrypted view file(s)");
    Ok(())
}

async fn cmd_upgrade(config: &PvaultConfig, version: u32) -> Result<()> {
    let vault = open_vault(config).await?;
    match vault.upgrade(version).await? {
        UpgradeOutcome::UpToDate { version: current } => {
            println!("already at encryption version {current}");
        }
        UpgradeOutcome::Upgraded { from, to } => {
            println!("upgraded encryption version {from} → {to}");
            let retained = vault.keys().retained_versions().await?;
            if !retained.is_empty() {
                println!(
                    "  some photos could not be re-encrypted; keeping key version(s) {retained:?}"
                );
            }
        }
    }
    Ok(())
}

async fn cmd_consent(config: &PvaultConfig, granted: bool) -> Result<()> {
    let vault = open_vault(config).await?;
    vault.set_consent(granted).await?;
    println!("consent {}", if granted { "granted" } else { "revoked" });
    Ok(())
}

fn cmd_config_show(config: &PvaultConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
