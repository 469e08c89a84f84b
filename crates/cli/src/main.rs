//! Hearth CLI: the main entry point.
//!
//! Commands:
//! - `init`      : Write the default config
//! - `chat`      : Talk to Hearth with a simulated home
//! - `status`    : Show configuration and engine health
//! - `portfolio` : Inspect and correct what Hearth knows about you
//! - `routine`   : Manage scheduled routines

use clap::{Parser, Subcommand};

mod commands;
mod voice;

#[derive(Parser)]
#[command(
    name = "hearth",
    about = "Hearth: a local-first voice assistant for the home",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration to ~/.hearth
    Init,

    /// Chat with Hearth; devices are simulated
    Chat,

    /// Show configuration and reasoning engine health
    Status,

    /// Inspect or correct the portfolio
    Portfolio {
        #[command(subcommand)]
        action: PortfolioCommand,
    },

    /// Manage routines
    Routine {
        #[command(subcommand)]
        action: RoutineCommand,
    },
}

#[derive(Subcommand)]
enum PortfolioCommand {
    /// List current entries, optionally within a scope
    List {
        /// Dotted scope, e.g. `routine` or `device.ceiling-fan`
        scope: Option<String>,
    },

    /// Show superseded values of a key
    History { key: String },

    /// Entries a low-trust write asked to confirm
    Pending,

    /// Overwrite an entry regardless of timestamps
    Set {
        key: String,
        /// JSON value; plain text is stored as a string
        value: String,
        #[arg(short, long, default_value_t = 1.0)]
        confidence: f32,
    },
}

#[derive(Subcommand)]
enum RoutineCommand {
    /// List routines
    List,

    /// Add a routine
    Add {
        name: String,
        /// Cron expression (minute hour day-of-month month day-of-week)
        schedule: String,
        /// What Hearth should do when the routine fires
        prompt: String,
    },

    /// Remove a routine
    Remove { name: String },

    /// Pause a routine
    Pause { name: String },

    /// Resume a paused routine
    Resume { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the conversation
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Chat => commands::chat::run().await?,
        Commands::Status => commands::status::run().await?,
        Commands::Portfolio { action } => match action {
            PortfolioCommand::List { scope } => commands::portfolio::list(scope.as_deref()).await?,
            PortfolioCommand::History { key } => commands::portfolio::history(&key).await?,
            PortfolioCommand::Pending => commands::portfolio::pending().await?,
            PortfolioCommand::Set {
                key,
                value,
                confidence,
            } => commands::portfolio::set(&key, &value, confidence).await?,
        },
        Commands::Routine { action } => match action {
            RoutineCommand::List => commands::routine::list().await?,
            RoutineCommand::Add {
                name,
                schedule,
                prompt,
            } => commands::routine::add(&name, &schedule, &prompt).await?,
            RoutineCommand::Remove { name } => commands::routine::remove(&name).await?,
            RoutineCommand::Pause { name } => commands::routine::set_enabled(&name, false).await?,
            RoutineCommand::Resume { name } => commands::routine::set_enabled(&name, true).await?,
        },
    }

    Ok(())
}
