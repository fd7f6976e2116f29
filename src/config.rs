use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Fixed account every document is stored under
    pub account_id: String,
    pub data_dir: PathBuf,
    pub bind_address: String,
    pub rollover_check_secs: u64,
    pub log_level: String,
}

impl AppConfig {
    /// Defaults, then `DailyCalc.toml` if present, then `DAILY_CALC_*`
    /// environment variables.
    pub fn load() -> Result<AppConfig, ConfigError> {
        Self::builder()?
            .add_source(ConfigFile::with_name("DailyCalc").required(false))
            .add_source(Environment::with_prefix("DAILY_CALC"))
            .build()?
            .try_deserialize::<AppConfig>()
    }

    /// Defaults only, ignoring files and the environment
    pub fn defaults() -> Result<AppConfig, ConfigError> {
        Self::builder()?.build()?.try_deserialize::<AppConfig>()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("account_id", "daily-calculator")?
            .set_default("data_dir", "data")?
            .set_default("bind_address", "127.0.0.1:3000")?
            .set_default("rollover_check_secs", 60)?
            .set_default("log_level", "info")
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("documents.bin.gz")
    }

    pub fn mirror_path(&self) -> PathBuf {
        self.data_dir.join("mirror.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = AppConfig::defaults().unwrap();
        assert_eq!(config.account_id, "daily-calculator");
        assert_eq!(config.rollover_check_secs, 60);
        assert_eq!(config.store_path(), PathBuf::from("data").join("documents.bin.gz"));
    }
}
