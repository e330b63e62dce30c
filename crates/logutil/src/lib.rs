//! Utilities for logging.

use std::io::IsTerminal;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::SubscriberBuilder;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable output.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("Unknown log format: {other}")),
        }
    }
}

/// Configure the global logger.
///
/// `RUST_LOG` takes precedence over `default_level` when set.
///
/// Does nothing if a global subscriber has already been installed.
pub fn configure_global_logger(default_level: Level, format: LogFormat) {
    let filter = env_filter(default_level);
    let builder = SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Text => {
            let ansi = std::io::stderr().is_terminal();
            tracing::subscriber::set_global_default(builder.with_ansi(ansi).finish())
        }
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
    };
}

/// Install a logger suitable for tests.
///
/// Output goes through the test writer so it's only shown for failing tests.
/// Safe to call from multiple tests.
pub fn init_test() {
    let _ = SubscriberBuilder::default()
        .with_env_filter(env_filter(Level::DEBUG))
        .with_test_writer()
        .try_init();
}

fn env_filter(default_level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(default_level).into())
        .from_env_lossy()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_format() {
        assert_eq!(LogFormat::Json, "JSON".parse().unwrap());
        assert_eq!(LogFormat::Text, "text".parse().unwrap());
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn init_test_twice() {
        init_test();
        init_test();
        tracing::debug!("logger initialized");
    }
}
