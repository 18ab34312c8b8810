//! nestguard: command-line tool for moderation configs, evaluations and
//! local batch runs.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nestguard_core::logging;

#[derive(Parser)]
#[command(name = "nestguard")]
#[command(author, version, about = "Content moderation core for nestguard")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score and decide one analysis result
    Evaluate {
        /// Moderation context (public_gallery, premium_gallery, private_content, paysite, ...)
        #[arg(short, long)]
        context: String,

        /// Analysis result JSON file
        #[arg(short, long)]
        analysis: PathBuf,

        /// Configuration JSON file (default: built-in for the context)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Item identifier recorded on the decision
        #[arg(long, default_value = "cli-item")]
        item_id: String,

        /// Image reference for follow-on jobs (default: the item id)
        #[arg(long)]
        image: Option<String>,
    },

    /// Print the built-in configuration for a context
    Defaults {
        #[arg(short, long)]
        context: String,
    },

    /// Check a configuration file
    ValidateConfig {
        /// Configuration JSON file
        file: PathBuf,
    },

    /// Run a batch payload through the local scheduler (dry run)
    RunBatch {
        /// Batch payload JSON file ({"items": [...]})
        file: PathBuf,

        /// Attempts per item
        #[arg(long, env = "BATCH_ITEM_MAX_ATTEMPTS")]
        item_attempts: Option<u32>,

        /// Items processed concurrently
        #[arg(long, env = "BATCH_ITEM_CONCURRENCY")]
        concurrency: Option<usize>,
    },
}

fn init_tracing() {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   RUST_LOG    - standard env filter (default: "nestguard=info")
    let log_format =
        std::env::var(logging::ENV_LOG_FORMAT).unwrap_or_else(|_| "text".to_string());

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "nestguard_cli=info,nestguard_moderation=info,nestguard_jobs=info".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Logs go to stderr so command output stays machine-readable.
    if log_format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    info!(
        subsystem = logging::SUBSYSTEM_CLI,
        log_format = %log_format,
        "Logging initialized"
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let output = match cli.command {
        Commands::Evaluate {
            context,
            analysis,
            config,
            item_id,
            image,
        } => {
            let image = image.as_deref().unwrap_or(&item_id);
            commands::evaluate(&context, &analysis, config.as_deref(), &item_id, image).await?
        }
        Commands::Defaults { context } => commands::defaults(&context)?,
        Commands::ValidateConfig { file } => commands::validate_config(&file).await?,
        Commands::RunBatch {
            file,
            item_attempts,
            concurrency,
        } => commands::run_batch(&file, item_attempts, concurrency).await?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
