use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Loads `env_file` (or `.env` from the working directory) into the process
/// environment, then builds the log filter from `RUST_LOG`, defaulting to
/// INFO. A `RUST_LOG` set only in the file therefore takes effect.
pub fn load_env_filter(env_file: Option<&Path>) -> EnvFilter {
    let _ = match env_file {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::dotenv().map(|_| ()),
    };
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Installs the fmt subscriber for a binary.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(load_env_filter(None))
        .init();
}
