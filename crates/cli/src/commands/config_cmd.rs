//! `healthflow config`: Configuration management commands.

use anyhow::{Context, bail};
use healthflow_config::AppConfig;

const REDACTED: &str = "********";

pub fn init(force: bool) -> anyhow::Result<()> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", config_path.display());
    }

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Cannot create {}", config_dir.display()))?;
    std::fs::write(&config_path, AppConfig::default_toml())
        .with_context(|| format!("Cannot write {}", config_path.display()))?;

    println!("Created {}", config_path.display());
    println!("Set HEALTHFLOW_API_KEY (or GEMINI_API_KEY) for the primary backend.");
    Ok(())
}

pub fn show() -> anyhow::Result<()> {
    let config = redacted(super::load_config()?);
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

fn redacted(mut config: AppConfig) -> AppConfig {
    for secret in [
        &mut config.primary.api_key,
        &mut config.fallback.api_key,
        &mut config.notifications.webhook_secret,
    ] {
        if secret.is_some() {
            *secret = Some(REDACTED.into());
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_redacted() {
        let mut config = AppConfig::default();
        config.primary.api_key = Some("gm-secret".into());
        config.notifications.webhook_secret = Some("hook-secret".into());

        let shown = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!shown.contains("gm-secret"));
        assert!(!shown.contains("hook-secret"));
        assert!(shown.contains(REDACTED));
    }

    #[test]
    fn unset_secrets_stay_unset() {
        let config = redacted(AppConfig::default());
        assert!(config.fallback.api_key.is_none());
    }
}
