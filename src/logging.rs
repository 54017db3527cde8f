use color_eyre::Result;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging.
///
/// Stdout carries tool responses, so logs go to a daily-rolling file in
/// `log_dir`, or to stderr when the directory is not writable. The returned
/// guard must be held until exit to flush buffered lines.
pub fn init_logging(log_dir: Option<&Path>) -> Result<WorkerGuard> {
  // Can be controlled via RUST_LOG env var
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let writable_dir = log_dir.filter(|dir| {
    std::fs::create_dir_all(dir)
      .and_then(|_| std::fs::File::create(dir.join(".test_write")))
      .and_then(|_| std::fs::remove_file(dir.join(".test_write")))
      .is_ok()
  });

  match writable_dir {
    Some(dir) => {
      let file_appender = tracing_appender::rolling::daily(dir, "fresolve.log");
      let (writer, guard) = non_blocking(file_appender);

      tracing_subscriber::registry()
        .with(env_filter)
        .with(
          fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true),
        )
        .try_init()?;

      info!("Logging to {}", dir.join("fresolve.log").display());
      Ok(guard)
    }
    None => {
      let (writer, guard) = non_blocking(std::io::stderr());

      tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(writer).with_target(false))
        .try_init()?;

      info!("Logging to stderr (no writable log directory)");
      Ok(guard)
    }
  }
}
