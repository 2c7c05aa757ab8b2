use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "genie")]
#[command(about = "TripGenie WhatsApp session router", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, an empty config file and the credential directory.
    Init {
        /// Config file path (default: GENIE_CONFIG_PATH or ~/.genie/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Connect to WhatsApp through the bridge and route messages to the backend. TRIGGER_WORD and END_TRIGGER_WORD must be set (or triggers.word / triggers.endWord in the config).
    Run {
        /// Config file path (default: GENIE_CONFIG_PATH or ~/.genie/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Bridge WebSocket URL (overrides GENIE_BRIDGE_URL and transport.bridgeUrl)
        #[arg(long, value_name = "URL")]
        bridge: Option<String>,

        /// Backend base URL (overrides GENIE_BACKEND_URL and backend.baseUrl)
        #[arg(long, value_name = "URL")]
        backend: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("genie {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run {
            config,
            bridge,
            backend,
        }) => {
            if let Err(e) = run(config, bridge, backend).await {
                log::error!("genie failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(genie::config::default_config_path);
    let dir = genie::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run(
    config_path: Option<PathBuf>,
    bridge: Option<String>,
    backend: Option<String>,
) -> anyhow::Result<()> {
    let (config, path) = genie::config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    let overrides = genie::config::Overrides {
        backend_url: backend,
        bridge_url: bridge,
    };
    genie::gateway::run_gateway(config, overrides).await
}
