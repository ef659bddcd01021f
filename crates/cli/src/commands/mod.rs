pub mod ask;
pub mod config_cmd;
pub mod doctor;
pub mod flows;
pub mod serve;
pub mod worker;

use anyhow::Context;
use healthflow_config::AppConfig;

/// Load `~/.healthflow/config.toml` with environment overrides applied.
pub fn load_config() -> anyhow::Result<AppConfig> {
    AppConfig::load().context("Failed to load config")
}
