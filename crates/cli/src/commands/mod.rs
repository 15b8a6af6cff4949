pub mod config_cmd;
pub mod dry_run;
pub mod preview;

use agentloop_config::AppConfig;
use anyhow::Context;
use std::path::Path;

/// Load the config file at `path`, or the default location with
/// environment overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => AppConfig::load().context("failed to load configuration"),
    }
}
