//! Subcommand implementations.

pub mod chat;
pub mod config;
pub mod identities;
pub mod signal;

use anyhow::Result;
use pairchat_core::Config;

/// Load config from `path`, or from the default location with env overrides.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            tracing::info!("Loading config from: {}", path);
            let mut config = Config::load_from(std::path::Path::new(path))?;
            config.apply_env();
            config
        }
        None => Config::load_with_env()?,
    };
    Ok(config)
}
