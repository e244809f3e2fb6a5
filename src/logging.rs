use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber writing to a log file in the data
/// directory. Stdout and stderr are left to command output.
///
/// The filter comes from CAMPUS_SYNC_LOG (default `info`). Keep the returned
/// guard alive until exit or buffered lines are lost.
pub fn init() -> Result<WorkerGuard> {
  let dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("campus-sync");
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
    &dir,
    "campus-sync.log",
  ));

  // Ignore invalid filters rather than refusing to start
  let filter = std::env::var("CAMPUS_SYNC_LOG")
    .ok()
    .and_then(|raw| EnvFilter::try_new(raw.trim()).ok())
    .unwrap_or_else(|| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .init();

  Ok(guard)
}
