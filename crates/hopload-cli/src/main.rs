//! 🚀 hopload-cli: the front door, the bouncer, the maitre d' of hopload.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Thin wrapper: set up logging, load config, run the pool, print the summary,
//! and turn any failure into a readable cause chain plus a non-zero exit. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use hopload::error::{ConfigError, PoolError};
use hopload::supervisors::RunSummary;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// 🎛️ Everything else comes from the environment (HOST, CONCURRENCY, TIME, COUNT, QUERY_*...).
#[derive(Debug, Parser)]
#[command(name = "hopload", version, about = "Continuous-load driver for multi-hop graph queries")]
struct Cli {
    /// 📄 TOML file merged over the environment (lower-case key names)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 📂 entities file, overrides ENTITIES_FILE
    #[arg(short, long)]
    entities: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 Set up tracing, because println! debugging is a lifestyle choice we're moving past
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result: Result<RunSummary> = async {
        let mut app_config = hopload::app_config::load_config(cli.config.as_deref())
            .context("💀 Couldn't load the configuration. Check the environment and the --config file.")?;
        if let Some(entities) = cli.entities {
            app_config.entities_file = entities;
        }
        hopload::run(app_config).await
    }
    .await;

    match result {
        Ok(summary) => {
            println!("{}", hopload::reporter::summary_table(&summary));
            if summary.snapshot.total > 0 && summary.snapshot.success == 0 {
                // -- 📡 attempts never kill the run, so a dead engine only shows up here
                warn!(
                    "🔧 hint: not a single query succeeded. Check ENGINE, HOST, PORT and DATABASE, \
                    and whether the engine is up."
                );
            }
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
            }
            if refused_before_start(&err) {
                error!(
                    "🔧 hint: not a single query was sent. Fix the setting or the entities \
                    file named above and run again."
                );
            }
            std::process::exit(exit_code(&err));
        }
    }
}

/// 🚦 Config and input-file problems end the run before any worker exists.
fn refused_before_start(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<ConfigError>().is_some())
}

/// 🪓 130 when a second Ctrl+C abandoned the run, like any interrupted shell command. 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    let aborted = err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<PoolError>(), Some(PoolError::Aborted { .. })));
    if aborted { 130 } else { 1 }
}
