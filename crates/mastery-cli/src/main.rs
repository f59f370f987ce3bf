//! mastery CLI: the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mastery_core::{EngineError, SessionId};

mod commands;

use commands::EngineArgs;

#[derive(Parser)]
#[command(name = "mastery", version, about = "Adaptive mastery-based tutor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session and print its first question
    Start {
        /// Lesson TOML file
        #[arg(long)]
        lesson: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Answer the pending question of a session
    Answer {
        #[arg(long)]
        session: SessionId,

        /// The learner's answer (may be empty)
        #[arg(long, allow_hyphen_values = true)]
        text: String,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Move past feedback to the next outcome
    Continue {
        #[arg(long)]
        session: SessionId,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Show per-outcome mastery and concept coverage
    Progress {
        #[arg(long)]
        session: SessionId,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Export a session transcript as JSON
    Export {
        #[arg(long)]
        session: SessionId,

        /// Output file (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List stored sessions
    Sessions {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run a lesson interactively on stdin/stdout
    Tutor {
        /// Lesson TOML file
        #[arg(long)]
        lesson: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Validate lesson TOML files
    Validate {
        /// Path to lesson file or directory
        #[arg(long)]
        lesson: PathBuf,
    },

    /// List available models
    ListModels {
        /// Filter to specific provider
        #[arg(long)]
        provider: Option<String>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and example lesson
    Init,
}

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mastery=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start { lesson, engine } => commands::start::execute(lesson, engine).await,
        Commands::Answer {
            session,
            text,
            engine,
        } => commands::answer::execute(session, Some(text), engine).await,
        Commands::Continue { session, engine } => {
            commands::answer::execute(session, None, engine).await
        }
        Commands::Progress { session, config } => {
            commands::progress::execute(session, config).await
        }
        Commands::Export {
            session,
            output,
            config,
        } => commands::export::execute(session, output, config).await,
        Commands::Sessions { config } => commands::progress::list_sessions(config).await,
        Commands::Tutor { lesson, engine } => commands::tutor::execute(lesson, engine).await,
        Commands::Validate { lesson } => commands::validate::execute(lesson),
        Commands::ListModels { provider, config } => {
            commands::list_models::execute(provider, config).await
        }
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        match e.downcast_ref::<EngineError>() {
            Some(engine) => eprintln!("Error [{}]: {e:#}", engine.code()),
            None => eprintln!("Error: {e:#}"),
        }
        process::exit(1);
    }
}
