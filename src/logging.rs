//! File logging setup.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

const LOG_FILE_PREFIX: &str = "skilltree-offline.log";

/// Directory log files are written to.
pub fn log_dir(config: &LogConfig) -> Result<PathBuf> {
  match &config.dir {
    Some(dir) => Ok(dir.clone()),
    None => {
      let data_dir =
        dirs::data_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
      Ok(data_dir.join("skilltree-offline").join("logs"))
    }
  }
}

/// Filter from RUST_LOG, falling back to the configured level.
fn env_filter(config: &LogConfig) -> Result<EnvFilter> {
  match EnvFilter::try_from_default_env() {
    Ok(filter) => Ok(filter),
    Err(_) => EnvFilter::try_new(&config.level)
      .map_err(|e| eyre!("Invalid log level '{}': {}", config.level, e)),
  }
}

/// Install a global subscriber writing to a daily rolling file.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the background writer.
pub fn init(config: &LogConfig) -> Result<WorkerGuard> {
  let dir = log_dir(config)?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(env_filter(config)?)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_explicit_dir_wins() {
    let config = LogConfig {
      level: "debug".to_string(),
      dir: Some(PathBuf::from("/tmp/skilltree-logs")),
    };
    assert_eq!(
      log_dir(&config).unwrap(),
      PathBuf::from("/tmp/skilltree-logs")
    );
  }

  #[test]
  fn test_invalid_level_is_rejected() {
    let config = LogConfig {
      level: "skilltree_offline=verbose".to_string(),
      dir: None,
    };
    if std::env::var("RUST_LOG").is_err() {
      assert!(env_filter(&config).is_err());
    }
  }
}
