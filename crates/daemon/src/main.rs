// stagehandd: replication queue worker.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use stagehand_daemon::config::StagehandConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stagehandd", about = "Stagehand replication worker")]
struct Args {
    /// Config file (defaults to ~/.stagehand/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = StagehandConfig::load(args.config.as_deref()).context("failed to load config")?;

    info!("starting stagehand replication worker");
    stagehand_daemon::runtime::run_standalone(config)
        .await
        .context("replication worker terminated unexpectedly")
}

fn init_tracing() {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    if std::env::var("STAGEHAND_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}
