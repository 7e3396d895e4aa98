//! Worker-process configuration: logging setup and cluster layouts.

mod cluster_file;
mod logging;

pub use cluster_file::{load_cluster_file, parse_cluster_toml};
pub use logging::{LogConfig, init_logging, init_logging_with};
