//! One-shot logging initialization from `EFL_LOG_LEVEL`.
//!
//! The level is numeric: 0=DEBUG, 1=INFO, 2=WARN, 3=ERROR, 4=FATAL
//! (mapped to ERROR; there is no fatal level in `tracing`). Unset or
//! unparsable values fall back to INFO. Call once at process start.

use std::env;

use tracing::Level;

const ENV_LOG_LEVEL: &str = "EFL_LOG_LEVEL";

/// Resolved logging configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    /// Minimum severity emitted.
    pub level: Level,
}

impl LogConfig {
    /// Reads `EFL_LOG_LEVEL` once.
    pub fn from_env() -> Self {
        Self {
            level: level_from_value(env::var(ENV_LOG_LEVEL).ok().as_deref()),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

fn level_from_value(raw: Option<&str>) -> Level {
    match raw.and_then(|v| v.trim().parse::<i64>().ok()) {
        Some(v) if v <= 0 => Level::DEBUG,
        Some(1) => Level::INFO,
        Some(2) => Level::WARN,
        Some(_) => Level::ERROR,
        None => Level::INFO,
    }
}

/// Initializes the global subscriber from the environment. Safe to call
/// more than once; later calls are ignored.
pub fn init_logging() {
    init_logging_with(LogConfig::from_env());
}

/// Initializes the global subscriber with an explicit configuration.
pub fn init_logging_with(config: LogConfig) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(config.level)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_defaults_to_info() {
        assert_eq!(level_from_value(None), Level::INFO);
    }

    #[test]
    fn numeric_levels_map_through() {
        assert_eq!(level_from_value(Some("0")), Level::DEBUG);
        assert_eq!(level_from_value(Some("1")), Level::INFO);
        assert_eq!(level_from_value(Some("2")), Level::WARN);
        assert_eq!(level_from_value(Some("3")), Level::ERROR);
        assert_eq!(level_from_value(Some("4")), Level::ERROR);
    }

    #[test]
    fn garbage_defaults_to_info() {
        assert_eq!(level_from_value(Some("verbose")), Level::INFO);
    }
}
