use anyhow::{Context, Result};
use clap::Subcommand;

use crate::cli::output::{Formatter, get_formatter};
use crate::models::{Config, OutputFormat};

const REDACTED: &str = "********";

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Write a configuration file with the defaults")]
    Init {
        #[arg(long, help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show the effective configuration")]
    Show,
    #[command(about = "Show configuration and data paths")]
    Path,
}

pub async fn handle_config(cmd: ConfigCommand, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    match cmd {
        ConfigCommand::Init { force } => handle_init(force, formatter.as_ref()),
        ConfigCommand::Show => handle_show(format),
        ConfigCommand::Path => handle_path(),
    }
}

fn handle_init(force: bool, formatter: &dyn Formatter) -> Result<()> {
    let config_path =
        Config::config_path().ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            config_path.display()
        );
    }

    Config::default()
        .save_to(&config_path)
        .context("failed to write config")?;
    print!(
        "{}",
        formatter.format_message(&format!("Created config at: {}", config_path.display()))
    );
    Ok(())
}

/// The effective configuration with secrets masked.
fn redacted(mut config: Config) -> Config {
    if config.embedding.api_key.is_some() {
        config.embedding.api_key = Some(REDACTED.to_string());
    }
    if config.vector_store.api_key.is_some() {
        config.vector_store.api_key = Some(REDACTED.to_string());
    }
    let masked_url = config.store.url.as_deref().and_then(|url| {
        let (scheme, rest) = url.split_once("://")?;
        let (_, host) = rest.rsplit_once('@')?;
        Some(format!("{scheme}://{REDACTED}@{host}"))
    });
    if masked_url.is_some() {
        config.store.url = masked_url;
    }
    config
}

fn handle_show(format: OutputFormat) -> Result<()> {
    let config = redacted(Config::load()?);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if let Some(path) = Config::config_path().filter(|p| p.exists()) {
        println!("# Config file: {}", path.display());
    } else {
        println!("# No config file, using defaults");
    }
    println!();
    print!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}

fn handle_path() -> Result<()> {
    println!("Configuration paths:");
    println!();

    if let Some(path) = Config::config_path() {
        let state = if path.exists() { "active" } else { "would be" };
        println!("Config file ({state}): {}", path.display());
    }
    if let Some(dir) = Config::data_dir() {
        println!("Data directory: {}", dir.display());
    }
    if let Ok(cwd) = std::env::current_dir() {
        let env_path = cwd.join(".env");
        let state = if env_path.exists() { "active" } else { "would be" };
        println!(".env file ({state}): {}", env_path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_masks_secrets() {
        let mut config = Config::default();
        config.embedding.api_key = Some("sk-secret".into());
        config.store.url = Some("postgres://kb:hunter2@db:5432/kb".into());

        let config = redacted(config);
        assert_eq!(config.embedding.api_key.as_deref(), Some(REDACTED));
        assert!(config.vector_store.api_key.is_none());
        assert_eq!(
            config.store.url.as_deref(),
            Some("postgres://********@db:5432/kb")
        );
    }

    #[test]
    fn test_redacted_keeps_plain_paths() {
        let mut config = Config::default();
        config.store.url = Some("/var/lib/kbsync/kb.db".into());
        assert_eq!(
            redacted(config).store.url.as_deref(),
            Some("/var/lib/kbsync/kb.db")
        );
    }
}
