mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "browsermux")]
#[command(about = "Drive browser profiles from the command line", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one command to the browser and print the reply
    Send {
        /// Command name understood by the extension (e.g. ping, click)
        command: String,

        /// JSON object passed as the command's data
        #[arg(short, long)]
        data: Option<String>,

        /// Profile id, id prefix or name (defaults to the active profile)
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Check that the profile's bridge is reachable
    Ping {
        /// Profile id, id prefix or name (defaults to the active profile)
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Show running bridges and their liveness
    Status {
        /// Remove entries whose process is gone
        #[arg(long)]
        prune: bool,
    },

    /// Manage browser profiles
    Profiles {
        #[command(subcommand)]
        command: ProfilesCommands,
    },

    /// Show or set the tab commands target by default
    Tab {
        /// Tab id to make active
        id: Option<i64>,

        /// Forget the active tab
        #[arg(long, conflicts_with = "id")]
        clear: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: String,
    },

    /// Run a stand-in extension against a locally spawned host
    DevPeer {
        /// Path to browsermux-host (defaults to the one next to this binary)
        #[arg(long)]
        host: Option<PathBuf>,

        /// Extension id to announce
        #[arg(long, default_value = "browsermux-dev-peer")]
        peer_id: String,

        /// Profile display name to announce
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProfilesCommands {
    /// List known profiles
    List,
    /// Make a profile active
    Use {
        /// Profile id, id prefix or name
        profile: String,
    },
    /// Forget a profile
    Remove {
        /// Profile id, id prefix or name
        profile: String,
    },
    /// Change a profile's display name
    Rename {
        /// Profile id, id prefix or name
        profile: String,
        /// New display name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // Replies go to stdout; keep logs out of the way.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Send {
            command,
            data,
            profile,
        } => {
            commands::send::run(&command, data.as_deref(), profile.as_deref()).await?;
        }
        Commands::Ping { profile } => {
            commands::ping::run(profile.as_deref()).await?;
        }
        Commands::Status { prune } => {
            commands::status::run(prune).await?;
        }
        Commands::Profiles { command } => match command {
            ProfilesCommands::List => {
                commands::profiles::list().await?;
            }
            ProfilesCommands::Use { profile } => {
                commands::profiles::use_profile(&profile).await?;
            }
            ProfilesCommands::Remove { profile } => {
                commands::profiles::remove(&profile).await?;
            }
            ProfilesCommands::Rename { profile, name } => {
                commands::profiles::rename(&profile, &name).await?;
            }
        },
        Commands::Tab { id, clear } => {
            commands::tab::run(id, clear).await?;
        }
        Commands::Completions { shell } => {
            commands::completions_cmd::run(&shell, Cli::command())?;
        }
        Commands::DevPeer {
            host,
            peer_id,
            name,
        } => {
            commands::dev_peer::run(host, &peer_id, name).await?;
        }
    }

    Ok(())
}
