//! nino-sync
//!
//! Operator tool for inspecting and editing a signed-in user's sessions
//! through the sync core. Every command prints JSON on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use nino_protocol::{DurableChanges, NewMessage, SessionType, UploadedMedia};
use nino_sync::backup::backup_key;
use nino_sync::config::{LogSettings, SyncConfig};
use nino_sync::logging::init_logging;
use nino_sync::{
    paths, BackupStorage, EmergencyBackup, HttpSessionStore, MediaUploader, RemoteSessionClient,
    SessionRegistry, SqliteBackupStorage, StaticToken, TokenFile, TokenProvider,
};

#[derive(Parser)]
#[command(name = "nino-sync")]
#[command(about = "Inspect and edit Nino sessions", long_about = None)]
struct Cli {
    /// Data directory (default: ~/.nino)
    #[arg(long, global = true, env = "NINO_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Remote store base URL
    #[arg(long, global = true, env = "NINO_API_URL")]
    api_url: Option<String>,

    /// Project key sent as the `apikey` header
    #[arg(long, global = true, env = "NINO_API_KEY")]
    api_key: Option<String>,

    /// Bearer credential (default: the token file in the data dir)
    #[arg(long, global = true, env = "NINO_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Identity the registry is bound to
    #[arg(long, global = true, env = "NINO_IDENTITY", default_value = "cli")]
    identity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions, most recent first
    Sessions,
    /// Create a session
    Create {
        #[arg(long)]
        title: Option<String>,
        #[arg(long = "type", default_value = "chat")]
        session_type: SessionType,
    },
    /// Rename a session
    Rename { session_id: String, title: String },
    /// Delete a session and its messages
    Delete { session_id: String },
    /// Print a session's messages
    Messages { session_id: String },
    /// Send a user message, uploading any local images first
    Send {
        session_id: String,
        content: String,
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },
    /// Inspect the local emergency backup
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// Print the stored record without consuming it
    Show { session_id: String },
    /// Drop the stored record
    Clear { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    paths::init_data_dir(cli.data_dir.as_deref());
    paths::ensure_dirs()?;
    let logging = init_logging(&LogSettings::from_env())?;
    info!(
        component = "cli",
        event = "cli.start",
        run_id = %logging.run_id,
        data_dir = %paths::data_dir().display(),
    );

    match cli.command {
        Commands::Backup { action } => run_backup(action),
        command => {
            let config = SyncConfig::resolve(cli.api_url, cli.api_key, cli.access_token)?;
            let registry = connect(&config, &cli.identity).await;
            run_session_command(&registry, command).await
        }
    }
}

async fn connect(config: &SyncConfig, identity: &str) -> SessionRegistry {
    let tokens: Arc<dyn TokenProvider> = match config.access_token.clone() {
        Some(token) => Arc::new(StaticToken::new(Some(token))),
        None => Arc::new(TokenFile::new(paths::token_file_path())),
    };
    let store = Arc::new(HttpSessionStore::new(
        config.api_url.clone(),
        config.api_key.clone(),
        tokens,
    ));
    let uploader: Arc<dyn MediaUploader> = store.clone();
    let registry = SessionRegistry::new(RemoteSessionClient::new(store, Some(uploader)));
    registry.bind(identity).await;
    info!(
        component = "cli",
        event = "cli.connected",
        api_url = %config.api_url,
        sessions = registry.sessions().len(),
    );
    registry
}

async fn run_session_command(registry: &SessionRegistry, command: Commands) -> Result<()> {
    match command {
        Commands::Sessions => print_json(&registry.sessions()),
        Commands::Create {
            title,
            session_type,
        } => {
            let session = registry.create_session(title, session_type, None).await?;
            print_json(&session)
        }
        Commands::Rename { session_id, title } => {
            registry
                .update_session(&session_id, DurableChanges::title(title))
                .await?;
            print_json(&registry.session(&session_id))
        }
        Commands::Delete { session_id } => {
            registry.delete_session(&session_id).await?;
            print_json(&json!({ "deleted": session_id }))
        }
        Commands::Messages { session_id } => {
            registry.select_session(Some(&session_id)).await;
            let session = registry
                .session(&session_id)
                .with_context(|| format!("session {session_id} not found"))?;
            print_json(&session.messages)
        }
        Commands::Send {
            session_id,
            content,
            images,
        } => {
            let images = images.into_iter().map(UploadedMedia::local_file).collect();
            let message = registry
                .send_message(&session_id, NewMessage::user(content).with_images(images))
                .await?;
            print_json(&message)
        }
        Commands::Backup { action } => run_backup(action),
    }
}

fn run_backup(action: BackupAction) -> Result<()> {
    let storage = Arc::new(SqliteBackupStorage::open(&paths::backup_db_path())?);
    match action {
        BackupAction::Show { session_id } => {
            let record = match storage.get(&backup_key(&session_id))? {
                Some(raw) => serde_json::from_str::<serde_json::Value>(&raw)?,
                None => serde_json::Value::Null,
            };
            print_json(&record)
        }
        BackupAction::Clear { session_id } => {
            EmergencyBackup::new(storage).discard(&session_id);
            print_json(&json!({ "cleared": session_id }))
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
