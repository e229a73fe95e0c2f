//! SecureShare CLI - send and receive envelope-encrypted files.
//!
//! Every user gets an RSA keypair at registration. Files are encrypted for a
//! single recipient and can only be decrypted by that recipient.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use secureshare_common::{ByteStream, Error, TransferId, UserId};
use secureshare_crypto::KdfParams;
use secureshare_storage::create_default_registry;
use secureshare_transfer::{
    LocalKeyDirectory, LocalRecordStore, TransferConfig, TransferOrchestrator,
};

#[derive(Parser)]
#[command(name = "secureshare")]
#[command(about = "SecureShare - Envelope-encrypted file transfer")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Data directory (default: platform data dir/secureshare).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file (default: built-in defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Passphrase sealing private keys in the key directory.
    #[arg(long, global = true, env = "SECURESHARE_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration to a file.
    InitConfig {
        /// Output path.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Register a user and issue their keypair.
    Register {
        /// User id.
        #[arg(short, long)]
        user: String,
    },

    /// Encrypt a file for a recipient.
    Send {
        /// Sending user.
        #[arg(long)]
        from: String,

        /// Receiving user.
        #[arg(long)]
        to: String,

        /// File to send.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Decrypt a transfer addressed to you.
    Receive {
        /// Transfer id.
        #[arg(long)]
        id: String,

        /// Receiving user.
        #[arg(long = "as")]
        as_user: String,

        /// Output path (default: the sent file name in the current directory).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List transfers addressed to a user.
    Inbox {
        /// Receiving user.
        #[arg(long = "as")]
        as_user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides the default level.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::InitConfig { out } => cmd_init_config(out).await,

        Commands::Register { user } => cmd_register(&cli, user).await,

        Commands::Send { from, to, file } => cmd_send(&cli, from, to, file).await,

        Commands::Receive { id, as_user, out } => {
            cmd_receive(&cli, id, as_user, out.as_deref()).await
        }

        Commands::Inbox { as_user } => cmd_inbox(&cli, as_user).await,
    }
}

/// Resolved data directory layout.
struct Workspace {
    config: TransferConfig,
    keys: Arc<LocalKeyDirectory>,
    orchestrator: TransferOrchestrator,
}

fn data_dir(cli: &Cli) -> Result<PathBuf> {
    match &cli.data_dir {
        Some(dir) => Ok(dir.clone()),
        None => dirs::data_dir()
            .map(|dir| dir.join("secureshare"))
            .context("No platform data directory; pass --data-dir"),
    }
}

async fn load_config(cli: &Cli) -> Result<TransferConfig> {
    match &cli.config {
        Some(path) => TransferConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(TransferConfig::default()),
    }
}

/// Open the stores under the data directory.
async fn open_workspace(cli: &Cli) -> Result<Workspace> {
    let root = data_dir(cli)?;
    let mut config = load_config(cli).await?;

    if config.storage.provider == "local" && config.storage.options.get("root").is_none() {
        config.storage.options = serde_json::json!({ "root": root.join("blobs") });
    }
    let blobs = config
        .storage
        .resolve(&create_default_registry())
        .context("Failed to open blob store")?;

    let records = Arc::new(
        LocalRecordStore::new(root.join("records")).context("Failed to open record store")?,
    );

    let mut keys = LocalKeyDirectory::new(root.join("keys"), config.crypto.clone())
        .context("Failed to open key directory")?;
    if let Some(passphrase) = &cli.passphrase {
        keys = keys.with_passphrase(passphrase.as_bytes(), KdfParams::default());
    }
    let keys = Arc::new(keys);

    let orchestrator = TransferOrchestrator::new(config.clone(), blobs, records, keys.clone())
        .context("Invalid configuration")?;

    Ok(Workspace {
        config,
        keys,
        orchestrator,
    })
}

fn parse_user(id: &str) -> Result<UserId> {
    UserId::new(id).with_context(|| format!("Invalid user id '{}'", id))
}

/// Turn a library error into the message the user should see.
fn user_error(err: Error, action: &str) -> anyhow::Error {
    anyhow::anyhow!("{}: {}", action, err.public_message())
}

/// Write the default configuration.
async fn cmd_init_config(out: &Path) -> Result<()> {
    TransferConfig::default()
        .save(out)
        .await
        .context("Failed to write config")?;

    println!("Default configuration written to {}", out.display());
    Ok(())
}

/// Register a user.
async fn cmd_register(cli: &Cli, user: &str) -> Result<()> {
    let user = parse_user(user)?;
    let workspace = open_workspace(cli).await?;

    info!("Registering user {}", user);
    workspace
        .keys
        .register(&user)
        .await
        .context("Failed to register user")?;

    println!("User registered: {}", user);
    println!("  Key size: {} bits", workspace.config.crypto.rsa_key_bits);
    println!(
        "  Private key: {}",
        if cli.passphrase.is_some() { "sealed" } else { "plain PEM" }
    );
    Ok(())
}

/// Send a file.
async fn cmd_send(cli: &Cli, from: &str, to: &str, file: &Path) -> Result<()> {
    let sender = parse_user(from)?;
    let recipient = parse_user(to)?;
    let workspace = open_workspace(cli).await?;

    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("File path has no usable file name")?
        .to_string();
    let handle = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let source: ByteStream = Box::pin(
        ReaderStream::with_capacity(handle, workspace.config.crypto.chunk_size)
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(Error::from)),
    );

    info!("Sending {} from {} to {}", file.display(), sender, recipient);
    let receipt = workspace
        .orchestrator
        .send(source, &file_name, &sender, &recipient)
        .await
        .map_err(|e| user_error(e, "Failed to send file"))?;

    println!("File sent successfully!");
    println!("  Transfer: {}", receipt.transfer_id);
    println!("  File: {} ({} bytes)", receipt.file_name, receipt.plaintext_size);
    Ok(())
}

/// Receive a file.
async fn cmd_receive(cli: &Cli, id: &str, as_user: &str, out: Option<&Path>) -> Result<()> {
    let requester = parse_user(as_user)?;
    let transfer_id = TransferId::from_string(id);
    let workspace = open_workspace(cli).await?;

    let delivery = workspace
        .orchestrator
        .receive(&transfer_id, &requester)
        .await
        .map_err(|e| user_error(e, "Failed to receive file"))?;

    let dest = match out {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(delivery.file_name()),
    };
    let mut output = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    match delivery.write_to(&mut output).await {
        Ok(bytes) => {
            println!("File received successfully: {} ({} bytes)", dest.display(), bytes);
            Ok(())
        }
        Err(e) => {
            drop(output);
            let _ = tokio::fs::remove_file(&dest).await;
            Err(user_error(e, "Failed to receive file"))
        }
    }
}

/// List a user's inbox.
async fn cmd_inbox(cli: &Cli, as_user: &str) -> Result<()> {
    let requester = parse_user(as_user)?;
    let workspace = open_workspace(cli).await?;

    let inbox = workspace
        .orchestrator
        .inbox(&requester)
        .await
        .map_err(|e| user_error(e, "Failed to list inbox"))?;

    if inbox.is_empty() {
        println!("No transfers for {}.", requester);
    } else {
        println!("Transfers for {}:", requester);
        for summary in inbox {
            println!(
                "  {}  {} from {} ({} bytes, {})",
                summary.id,
                summary.file_name,
                summary.sender_id,
                summary.ciphertext_size,
                summary.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
    Ok(())
}
