//! AIQ CLI, the main entry point.
//!
//! Commands:
//! - `chat`    Single message or interactive session, optionally bound to a database
//! - `skills`  List and inspect installed skills
//! - `config`  Show or initialise the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "aiq",
    about = "AIQ: ask questions about your database and system in plain language",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Database to query (a sqlite: URL or file path); free mode without it
        #[arg(long, env = "AIQ_DATABASE_URL")]
        database: Option<String>,

        /// Engine the database must be (sqlite, mysql, postgresql, seekdb)
        #[arg(long)]
        engine: Option<String>,

        /// Run SQL without asking for confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Inspect installed skills
    Skills {
        #[command(subcommand)]
        action: SkillsAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SkillsAction {
    /// List discovered skills
    List,
    /// Print one skill's document
    Show { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration with secrets redacted
    Show,
    /// Write default config, skills and prompt directories
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            database,
            engine,
            yes,
        } => commands::chat::run(message, database, engine, yes).await?,
        Commands::Skills { action } => match action {
            SkillsAction::List => commands::skills::list()?,
            SkillsAction::Show { name } => commands::skills::show(&name)?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Init { force } => commands::config_cmd::init(force)?,
        },
    }

    Ok(())
}
