//! `agentloop config`: configuration management commands.

use super::load_config;
use agentloop_config::AppConfig;
use anyhow::{Context, bail};
use std::path::{Path, PathBuf};

fn target(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_path)
}

pub fn init(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = target(path);
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    std::fs::write(&path, AppConfig::default_toml())
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Wrote default configuration");
    println!("{}", path.display());
    Ok(())
}

pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    print!("{}", render(&config)?);
    Ok(())
}

pub fn validate(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    config.validate()?;

    println!("Config OK ({})", target(path).display());
    println!("  Provider:     {}", config.default_provider);
    println!("  Model:        {}", config.default_model);
    println!("  Max steps:    {}", config.runtime.max_steps);
    println!(
        "  Compression:  {}",
        if config.runtime.compression.enabled {
            "on"
        } else {
            "off"
        }
    );
    println!("  Telemetry:    {}", config.telemetry.enabled);
    Ok(())
}

fn render(config: &AppConfig) -> anyhow::Result<String> {
    toml::to_string_pretty(config).context("failed to render configuration")
}
