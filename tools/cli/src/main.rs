//! Keywarden CLI - hosts the key service and provides small key utilities.
//!
//! `serve` speaks the JSON-line request protocol on stdin/stdout. Logs go to
//! stderr so stdout carries replies only.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use keywarden_boundary::KeyServiceHandle;
use keywarden_crypto::{codec, generate_raw_key, seal_delivery};
use keywarden_keyring::{KeyService, KeyStoreConfig, KekSource, ServiceConfig};

#[derive(Parser)]
#[command(name = "keywarden")]
#[command(about = "Keywarden - client-side envelope-encryption key service")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Service configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the local key store; overrides the configured store.
    #[arg(short, long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-line requests from stdin, one reply line per request.
    Serve,

    /// Print the device public key (base64), creating the identity if needed.
    DeviceKey,

    /// Print a fresh random 256-bit key (base64).
    GenKey,

    /// Seal a KEK to a device public key, printing a ProvisionKek source.
    SealKek {
        /// Recipient device public key (base64, uncompressed SEC1).
        #[arg(short, long)]
        public_key: String,

        /// KEK to deliver (base64, 32 bytes).
        #[arg(short, long)]
        kek: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Commands::Serve => {
            let config = resolve_config(cli.config.as_deref(), cli.store_dir)?;
            cmd_serve(config).await
        }
        Commands::DeviceKey => {
            let config = resolve_config(cli.config.as_deref(), cli.store_dir)?;
            cmd_device_key(config).await
        }
        Commands::GenKey => cmd_gen_key(),
        Commands::SealKek { public_key, kek } => cmd_seal_kek(&public_key, &kek),
    }
}

/// Default local key store location.
fn default_store_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("No local data directory on this platform")?;
    Ok(base.join("keywarden"))
}

/// Build the service configuration from the command-line options.
fn resolve_config(config_path: Option<&Path>, store_dir: Option<PathBuf>) -> Result<ServiceConfig> {
    let mut config = match config_path {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServiceConfig {
            key_store: KeyStoreConfig::local(default_store_dir()?),
            ..Default::default()
        },
    };

    if let Some(dir) = store_dir {
        config.key_store = KeyStoreConfig::local(dir);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Host the key service over stdin/stdout.
async fn cmd_serve(config: ServiceConfig) -> Result<()> {
    let service = KeyService::from_config(config).context("Failed to start key service")?;
    let (handle, task) = KeyServiceHandle::spawn(service);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("Serving requests on stdin");

    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = handle.dispatch_json(&line).await;
        let mut out = serde_json::to_string(&reply).context("Failed to encode reply")?;
        out.push('\n');
        stdout
            .write_all(out.as_bytes())
            .await
            .context("Failed to write reply")?;
        stdout.flush().await.context("Failed to flush reply")?;
    }

    debug!("Input closed");
    handle.shutdown().await;
    task.await.context("Key service task failed")?;
    Ok(())
}

/// Print the device public key.
async fn cmd_device_key(config: ServiceConfig) -> Result<()> {
    let mut service = KeyService::from_config(config).context("Failed to start key service")?;
    let public = service
        .device_public_key()
        .await
        .context("Failed to read device identity")?;

    println!("{}", codec::encode(&public));
    Ok(())
}

/// Print a fresh random key.
fn cmd_gen_key() -> Result<()> {
    let key = generate_raw_key();
    println!("{}", codec::encode(&key[..]));
    Ok(())
}

/// Seal a KEK to a device public key.
fn cmd_seal_kek(public_key: &str, kek: &str) -> Result<()> {
    let public_raw = codec::decode(public_key).context("Invalid public key encoding")?;
    let kek_bytes = codec::decode(kek).context("Invalid KEK encoding")?;
    let kek: [u8; 32] = kek_bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("KEK must be 32 bytes, got {}", kek_bytes.len()))?;

    let delivery = seal_delivery(&public_raw, &kek).context("Failed to seal KEK")?;
    let source = KekSource::Wrapped { wrapped: delivery };

    println!("{}", serde_json::to_string(&source)?);
    Ok(())
}
