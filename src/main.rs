use std::collections::BTreeSet;
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use peerwrite::config::{ConfigError, CoreConfig};
use peerwrite::error::{ErrorCode, SessionError};
use peerwrite::roster::{Roster, RosterError, StaticRoster};
use peerwrite::services::partner::AssignRequest;
use peerwrite::services::workflow::{self, Channel};
use peerwrite::state::AppState;
use peerwrite::storage::{self, StorageError};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("roster error: {0}")]
    Roster(#[from] RosterError),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("failed to read input: {0}")]
    Input(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "peerwrite", about = "Collaborative writing sessions")]
struct Cli {
    /// Storage backend: memory, disk or postgres (overrides STORAGE_BACKEND).
    #[arg(long)]
    storage: Option<String>,

    /// Disk backend root (overrides DATA_DIR).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    database_url: Option<String>,

    /// Roster JSON file (overrides ROSTER_PATH).
    #[arg(long)]
    roster: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start or resume a session.
    Start {
        group: String,
        participant_id: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    Show {
        session_key: String,
    },
    List {
        #[arg(long)]
        group: Option<String>,
    },
    Prewrite(TextArgs),
    Draft(TextArgs),
    Notes(TextArgs),
    Final(TextArgs),
    AdvancePeer {
        session_key: String,
    },
    AdvanceFinal {
        session_key: String,
    },
    Jump {
        session_key: String,
        #[arg(allow_negative_numbers = true)]
        stage: i64,
    },
    Regress {
        session_key: String,
    },
    /// Assign a partner by session key or participant id.
    Pair {
        session_key: String,
        #[arg(long, required_unless_present = "partner_id")]
        partner_key: Option<String>,
        #[arg(long)]
        partner_id: Option<String>,
        #[arg(long)]
        partner_name: Option<String>,
    },
    Unpair {
        session_key: String,
    },
    Delete {
        #[arg(required = true)]
        session_keys: Vec<String>,
    },
    /// Post a message to the session's room.
    Say(TextArgs),
    Transcript {
        session_key: String,
        #[arg(long, value_enum, default_value_t = ChannelArg::Peer)]
        channel: ChannelArg,
    },
}

#[derive(Args, Debug)]
struct TextArgs {
    session_key: String,

    #[arg(long, conflicts_with = "input")]
    text: Option<String>,

    #[arg(long, default_value = "-", help = "Input file path, or - for stdin")]
    input: String,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ChannelArg {
    Ai,
    Peer,
}

impl From<ChannelArg> for Channel {
    fn from(value: ChannelArg) -> Self {
        match value {
            ChannelArg::Ai => Self::Ai,
            ChannelArg::Peer => Self::Peer,
        }
    }
}

impl Cli {
    /// Environment config with command-line flags taking precedence.
    fn config(&self) -> Result<CoreConfig, ConfigError> {
        let mut overrides = HashMap::new();
        if let Some(storage) = &self.storage {
            overrides.insert("STORAGE_BACKEND", storage.clone());
        }
        if let Some(dir) = &self.data_dir {
            overrides.insert("DATA_DIR", dir.display().to_string());
        }
        if let Some(url) = &self.database_url {
            overrides.insert("DATABASE_URL", url.clone());
        }
        if let Some(roster) = &self.roster {
            overrides.insert("ROSTER_PATH", roster.display().to_string());
        }
        CoreConfig::from_lookup(|key| {
            overrides
                .get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;

    let backend = storage::open_backend(&config.storage).await?;
    let roster: Arc<dyn Roster> = match &config.roster_path {
        Some(path) => Arc::new(StaticRoster::load(path).await?),
        None => Arc::new(StaticRoster::default()),
    };
    let state = AppState::open(config, backend, roster).await?;

    if let Err(e) = run(&state, cli.command).await {
        if let CliError::Session(err) = &e {
            tracing::error!(code = err.error_code(), retryable = err.retryable(), "{err}");
        }
        return Err(e);
    }
    Ok(())
}

async fn run(state: &AppState, command: Command) -> Result<(), CliError> {
    match command {
        Command::Start { group, participant_id, name } => {
            print_json(&workflow::start(state, &group, &participant_id, &name).await?)
        }
        Command::Show { session_key } => print_json(&workflow::show(state, &session_key).await?),
        Command::List { group } => print_json(&workflow::list(state, group.as_deref()).await),
        Command::Prewrite(args) => {
            let text = read_text(&args)?;
            print_json(&workflow::submit_prewriting(state, &args.session_key, &text).await?)
        }
        Command::Draft(args) => {
            let text = read_text(&args)?;
            print_json(&workflow::save_draft(state, &args.session_key, &text).await?)
        }
        Command::Notes(args) => {
            let text = read_text(&args)?;
            print_json(&workflow::save_notes(state, &args.session_key, &text).await?)
        }
        Command::Final(args) => {
            let text = read_text(&args)?;
            print_json(&workflow::submit_final(state, &args.session_key, &text).await?)
        }
        Command::AdvancePeer { session_key } => {
            print_json(&workflow::advance_to_peer(state, &session_key).await?)
        }
        Command::AdvanceFinal { session_key } => {
            print_json(&workflow::advance_to_final(state, &session_key).await?)
        }
        Command::Jump { session_key, stage } => print_json(&workflow::jump(state, &session_key, stage).await?),
        Command::Regress { session_key } => print_json(&workflow::regress(state, &session_key).await?),
        Command::Pair { session_key, partner_key, partner_id, partner_name } => {
            let request = AssignRequest { partner_session_key: partner_key, partner_id, partner_name };
            print_json(&workflow::assign_partner(state, &session_key, &request).await?)
        }
        Command::Unpair { session_key } => print_json(&workflow::clear_partner(state, &session_key).await?),
        Command::Delete { session_keys } => {
            let keys: BTreeSet<String> = session_keys.into_iter().collect();
            print_json(&workflow::delete(state, &keys).await?)
        }
        Command::Say(args) => {
            let text = read_text(&args)?;
            print_json(&workflow::post_peer_message(state, &args.session_key, &text).await?)
        }
        Command::Transcript { session_key, channel } => {
            print_json(&workflow::transcript(state, &session_key, channel.into()).await?)
        }
    }
}

fn read_text(args: &TextArgs) -> Result<String, CliError> {
    if let Some(text) = &args.text {
        return Ok(text.clone());
    }
    let mut text = String::new();
    if args.input == "-" {
        std::io::stdin().read_to_string(&mut text)?;
    } else {
        std::fs::File::open(&args.input)?.read_to_string(&mut text)?;
    }
    Ok(text)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
