//! Tracing subscriber setup for the binary.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Filter for a `-v` count: 0 = warn, 1 = info, 2+ = debug. `RUST_LOG` wins when set.
pub fn filter_for(verbose: u8) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    EnvFilter::new(match verbose {
      0 => "shellcache=warn",
      1 => "shellcache=info",
      _ => "shellcache=debug",
    })
  })
}

/// Install the global subscriber.
///
/// Logs go to stderr. With `log_file` they are also appended to that file
/// through a non-blocking writer; the returned guard must live until exit or
/// buffered lines are lost.
pub fn init(verbose: u8, log_file: Option<&Path>) -> std::io::Result<Option<WorkerGuard>> {
  let filter = filter_for(verbose);

  match log_file {
    Some(path) => {
      let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
      };
      std::fs::create_dir_all(dir)?;
      let file_name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "log file has no name"))?;

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr.and(writer))
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}
