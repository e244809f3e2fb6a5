mod commands;
mod logging;

use campus_sync::cache::{CacheStorage, NoopStorage, SqliteStorage};
use campus_sync::config::Config;
use campus_sync::Campus;
use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "campus-sync")]
#[command(about = "Cached command line access to the campus productivity API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/campus-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long)]
  no_persist: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  color_eyre::install()?;
  let _guard = logging::init()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  if config.cache.persist && !args.no_persist {
    run(&config, SqliteStorage::open()?, args.command).await
  } else {
    run(&config, NoopStorage, args.command).await
  }
}

async fn run<S: CacheStorage + 'static>(
  config: &Config,
  storage: S,
  command: commands::Command,
) -> Result<ExitCode> {
  let campus =
    Campus::from_config(config, storage)?.with_notifier(Arc::new(commands::ConsoleNotifier));
  tracing::debug!(base = %campus.api().base_url(), "Starting");
  commands::run(&campus, command).await
}
