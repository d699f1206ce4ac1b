mod cli;
mod config;
mod helper;
mod protocol;
mod reloader;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use block_log::BlockLog;
use policy_engine::{FileStore, PolicyStore, SqlStore};

use crate::cli::Cli;
use crate::config::{LoggingConfig, PolicySource};
use crate::helper::Helper;
use crate::reloader::PolicyReloader;

/// Stdout carries replies to squid, so diagnostics go to stderr or a file.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false);

    match &logging.file {
        Some(path) => {
            let file = open_log_file(path)?;
            builder.with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

async fn open_store(source: &PolicySource) -> Result<Box<dyn PolicyStore>> {
    Ok(match source {
        PolicySource::Database(url) => Box::new(
            SqlStore::connect(url)
                .await
                .with_context(|| format!("failed to open policy database {url}"))?,
        ),
        PolicySource::File(path) => Box::new(FileStore::new(path)),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;
    cfg.merge_cli(&cli);

    // 3. Diagnostics.
    init_tracing(&cfg.logging)?;

    let source = cfg.policy.source()?;
    info!(
        config_file = %cli.config.display(),
        policy = ?source,
        block_log = ?cfg.block_log,
        "acl-helper starting"
    );

    // 4. Initial policy load; without it there is nothing to answer with.
    let store = open_store(&source).await?;
    let reloader = PolicyReloader::initial(
        store,
        cfg.policy.reload_interval(),
        cfg.policy.reload_timeout(),
    )
    .await
    .context("failed to load initial policy")?;

    // 5. Block log.
    let block_log = cfg
        .block_log
        .as_ref()
        .map(BlockLog::new)
        .transpose()
        .context("failed to prepare block log")?;

    // 6. Serve squid until it closes our stdin.
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    Helper::new(reloader, block_log).run(stdin, stdout).await?;

    info!("acl-helper exiting");
    Ok(())
}
