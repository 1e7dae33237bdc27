//! proctor CLI — replay, inspect and recover exam sessions.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use proctor_core::security::SecurityLevel;

mod commands;
mod script;

#[derive(Parser)]
#[command(name = "proctor", version, about = "Exam session integrity engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a session from a scripted list of user actions and signals
    Run {
        /// Path to the exam .toml file
        #[arg(long)]
        exam: PathBuf,

        /// Path to the session script (.toml)
        #[arg(long)]
        script: PathBuf,

        /// Override the configured security level (standard, high, maximum)
        #[arg(long)]
        level: Option<SecurityLevel>,

        /// Resume a session by id, or "latest" for the newest incomplete one
        #[arg(long)]
        resume: Option<String>,

        /// Leave the session resumable instead of submitting at the end
        #[arg(long)]
        no_submit: bool,

        /// Write the final session (or submission) JSON here
        #[arg(long)]
        output: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List persisted sessions
    Sessions {
        /// Exam id; lists every exam in the storage directory when omitted
        #[arg(long)]
        exam_id: Option<String>,

        /// Only show sessions that can still be resumed
        #[arg(long)]
        incomplete: bool,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show one persisted session
    Inspect {
        /// Session id
        #[arg(long)]
        session: String,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate exam TOML files
    Validate {
        /// Path to exam file or directory
        #[arg(long)]
        exam: PathBuf,
    },

    /// Create starter config, example exam and script
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("proctor=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            exam,
            script,
            level,
            resume,
            no_submit,
            output,
            config,
        } => {
            commands::run::execute(exam, script, level, resume, no_submit, output, config).await
        }
        Commands::Sessions {
            exam_id,
            incomplete,
            config,
        } => commands::sessions::execute(exam_id, incomplete, config),
        Commands::Inspect {
            session,
            format,
            config,
        } => commands::inspect::execute(session, format, config),
        Commands::Validate { exam } => commands::validate::execute(exam),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
