//! Process entrypoint (C12): loads `.env`, installs the tracing subscriber,
//! parses the CLI, and dispatches to a `commands::*` handler.

use std::path::PathBuf;

use anyhow::Result;
use aviation_hub::commands::{self, serve::ServeOptions};
use aviation_hub::log_format::{RedactingFields, TargetFirstFormat};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aviation-hub", version, about = "Real-time aviation intelligence hub")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the source manager, trackers, EAM pipeline, hub, and web server.
    Serve {
        /// Postgres connection string.
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,

        /// Interface to bind the web server to.
        #[arg(long, env = "BIND_INTERFACE", default_value = "0.0.0.0")]
        interface: String,

        /// Port to bind the web server to.
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,

        /// Path to a TOML file of runtime configuration overrides,
        /// hot-reloaded on change.
        #[arg(long, env = "CONFIG_FILE")]
        config_file: Option<PathBuf>,

        /// Comma-separated list of allowed subscriber origins. When unset,
        /// origin is not enforced.
        #[arg(long, env = "ALLOWED_ORIGINS")]
        allowed_origins: Option<String>,
    },

    /// Operate on the configuration registry's persisted source enable flags.
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },

    /// Show resolved configuration (runtime overrides -> environment -> defaults).
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SourcesAction {
    /// List every known source and whether it is currently enabled.
    List {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Mark a source enabled.
    Enable {
        name: String,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Mark a source disabled.
    Disable {
        name: String,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Dump the resolved configuration for one category, or every category
    /// when omitted.
    Show { category: Option<String> },
}

fn install_tracing() {
    tracing_subscriber::fmt()
        .event_format(TargetFirstFormat)
        .fmt_fields(RedactingFields)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    install_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { database_url, interface, port, config_file, allowed_origins } => {
            let allowed_origins = allowed_origins.map(|origins| origins.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect());
            commands::handle_serve(ServeOptions { database_url, interface, port, config_path: config_file, allowed_origins }).await
        }
        Commands::Sources { action } => match action {
            SourcesAction::List { database_url } => commands::handle_sources_list(&database_url).await,
            SourcesAction::Enable { name, database_url } => commands::handle_sources_enable(&database_url, &name).await,
            SourcesAction::Disable { name, database_url } => commands::handle_sources_disable(&database_url, &name).await,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show { category } => commands::handle_config_show(category.as_deref()).await,
        },
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "fatal error, exiting");
        std::process::exit(1);
    }
    Ok(())
}
