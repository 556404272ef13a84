use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

mod cli;

#[derive(Parser)]
#[command(name = "hubsync")]
#[command(about = "Follow and drive AI hub sessions from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Hub base url, e.g. http://127.0.0.1:8080 (overrides config.toml)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions
    Sessions(SessionsArgs),

    /// Open an interactive chat
    Chat(ChatArgs),

    /// Delete a session
    Delete(DeleteArgs),

    /// Show token usage for a session
    Usage(UsageArgs),
}

#[derive(Parser)]
struct SessionsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct ChatArgs {
    /// Existing session to open (default: start a new one)
    #[arg(long)]
    session: Option<i64>,

    /// Working directory for a new session
    #[arg(long)]
    work_dir: Option<String>,

    /// Group label for a new session
    #[arg(long)]
    group: Option<String>,
}

#[derive(Parser)]
struct DeleteArgs {
    session_id: i64,
}

#[derive(Parser)]
struct UsageArgs {
    session_id: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "hub_sync=debug"
    } else {
        "hub_sync=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let settings = cli::load_settings(cli.data_dir, cli.server)?;

    match cli.command {
        Commands::Sessions(args) => cli::sessions_command(&settings, args.json).await,
        Commands::Chat(args) => {
            cli::chat_command(&settings, args.session, args.work_dir, args.group).await
        }
        Commands::Delete(args) => cli::delete_command(&settings, args.session_id).await,
        Commands::Usage(args) => cli::usage_command(&settings, args.session_id).await,
    }
}
