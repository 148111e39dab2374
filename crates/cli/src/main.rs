// stagehand CLI entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_code;
mod output;

use output::OutputFormat;

#[derive(Parser)]
#[command(name = "stagehand", about = "Workspace replication queue and negotiation")]
struct Cli {
    /// Config file (defaults to ~/.stagehand/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::detect(cli.json);
    match commands::run(cli.command, cli.config.as_deref(), format) {
        Ok(()) => exit_code::ExitCode::Success.into(),
        Err(error) => {
            output::print_anyhow_error(format, &error);
            exit_code::ExitCode::from_error(&error).into()
        }
    }
}
