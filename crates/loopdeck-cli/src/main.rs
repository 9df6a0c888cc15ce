use anyhow::Result;
use clap::{Parser, Subcommand};
use loopdeck_core::config::LoopdeckConfig;
use loopdeck_infrastructure::ConfigService;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "loopdeck")]
#[command(about = "Loopdeck CLI - inspect and manage locally stored REPLs", long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List REPLs, most recently updated first
    List,
    /// Create a REPL and make it active
    New {
        #[arg(long)]
        name: Option<String>,
        /// Initial code (defaults to the starter code)
        #[arg(long)]
        code: Option<String>,
    },
    /// Print a REPL as JSON
    Show { id: String },
    /// Archive a REPL
    Archive { id: String },
    /// Unarchive a REPL
    Unarchive { id: String },
    /// Delete a REPL and its thread associations
    Delete { id: String },
    /// Rename a REPL, keeping its code
    Rename { id: String, name: String },
    /// Show or set the active REPL
    Active {
        #[arg(long)]
        set: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

fn init_logging(config: &LoopdeckConfig) {
    let level = &config.log_level;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "loopdeck={level},loopdeck_infrastructure={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let service = match cli.config {
        Some(path) => ConfigService::with_path(path),
        None => ConfigService::new(),
    };
    let config = service.get_config();
    init_logging(&config);

    if let Commands::Config = cli.command {
        return commands::config::show(&service);
    }

    let store = commands::open_store(&config)?;
    match cli.command {
        Commands::List => commands::repl::list(&store).await?,
        Commands::New { name, code } => {
            commands::repl::create(&store, name.as_deref(), code.as_deref()).await?
        }
        Commands::Show { id } => commands::repl::show(&store, &id).await?,
        Commands::Archive { id } => commands::repl::archive(&store, &id).await?,
        Commands::Unarchive { id } => commands::repl::unarchive(&store, &id).await?,
        Commands::Delete { id } => commands::repl::delete(&store, &id).await?,
        Commands::Rename { id, name } => commands::repl::rename(&store, &id, &name).await?,
        Commands::Active { set } => commands::repl::active(&store, set.as_deref()).await?,
        Commands::Config => {}
    }

    Ok(())
}
