use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use raidclip_common::models::EngineConfig;
use raidclip_core::commands::EngineCommand;

mod client;
mod server;

const DEBUG_LOG_FILE: &str = "debug.txt";

#[derive(Parser, Debug, Clone)]
#[command(name = "raidclip")]
#[command(author, version, about = "RaidClip - shows a raider's top clip on stream and stops the broadcast afterwards")]
pub struct Args {
    /// Path to the YAML config file
    #[arg(long, global = true, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Local server port; defaults to SERVER_PORT from the config
    #[arg(long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Cmd,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Cmd {
    /// Run the engine until Ctrl-C
    Serve,
    /// Print the persisted config
    LoadConfig,
    /// Play a clip on the overlay
    StartClip {
        url: String,
        /// Stop after this many seconds (0 plays to the end)
        #[arg(long)]
        duration: Option<f64>,
    },
    StopClip,
    StopStream,
    TestConnection,
    TestOverlay,
    /// Run a raid from LOGIN through the normal path, using their clips
    DebugRaid { login: String },
    /// Append the sample clip to the clip registry
    DebugEntry,
    Status,
}

impl Cmd {
    /// The command sent to a running engine; `None` for `serve`.
    pub fn to_engine_command(&self) -> Option<EngineCommand> {
        let cmd = match self {
            Cmd::Serve => return None,
            Cmd::LoadConfig => EngineCommand::LoadConfig,
            Cmd::StartClip { url, duration } => EngineCommand::StartClip {
                url: url.clone(),
                duration: *duration,
            },
            Cmd::StopClip => EngineCommand::StopClip,
            Cmd::StopStream => EngineCommand::StopStream,
            Cmd::TestConnection => EngineCommand::TestConnection,
            Cmd::TestOverlay => EngineCommand::TestOverlay,
            Cmd::DebugRaid { login } => EngineCommand::InjectDebugRaid {
                from: login.clone(),
                clips: Vec::new(),
            },
            Cmd::DebugEntry => EngineCommand::InjectDebugEntry,
            Cmd::Status => EngineCommand::Status,
        };
        Some(cmd)
    }
}

/// Reads the config without creating it; the engine writes defaults on its own load.
fn peek_config(path: &Path) -> EngineConfig {
    match std::fs::read_to_string(path) {
        Ok(raw) => EngineConfig::from_yaml(&raw).unwrap_or_else(|e| {
            eprintln!("{}: {} (using defaults)", path.display(), e);
            EngineConfig::default()
        }),
        Err(_) => EngineConfig::default(),
    }
}

fn init_tracing(cfg: &EngineConfig, to_file: bool) -> anyhow::Result<()> {
    let level = if cfg.debug_mode { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("raidclip={},tower_http=warn", level)));

    let file_layer = if to_file {
        std::fs::create_dir_all(&cfg.log_dest)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(&cfg.log_dest).join(DEBUG_LOG_FILE))?;
        Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let cfg = peek_config(&args.config);

    match args.command.to_engine_command() {
        None => {
            init_tracing(&cfg, true)?;
            info!("RaidClip starting. config={}", args.config.display());
            if let Err(e) = server::run_server(&args).await {
                error!("Server error: {:?}", e);
                return Err(e);
            }
            info!("Main finished. Goodbye!");
        }
        Some(command) => {
            if let Err(e) = init_tracing(&cfg, false) {
                eprintln!("Logging unavailable: {}", e);
            }
            let port = args.port.unwrap_or(cfg.local_server_port_number);
            client::run_client(port, command).await?;
        }
    }
    Ok(())
}
