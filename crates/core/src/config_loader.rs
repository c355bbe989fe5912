use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use std::path::Path;

const ENV_PREFIX: &str = "IBKR_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by layering defaults, TOML, `IBKR_` environment
    /// variables and JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config")
    }

    /// Same as [`ConfigLoader::load`] but reads `Config.toml` / `config.json`
    /// from `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed, or
    /// if the dispatcher id seed is out of range.
    pub fn load_from(dir: impl AsRef<Path>) -> Result<AppConfig> {
        let dir = dir.as_ref();
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(dir.join("Config.toml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file(dir.join("config.json")))
            .extract()?;
        config
            .dispatcher
            .validate()
            .context("Invalid [dispatcher] configuration")?;

        tracing::debug!(
            url = %config.gateway.connection_url(),
            client_id = config.gateway.client_id,
            "Loaded bridge configuration"
        );
        Ok(config)
    }

    /// Loads configuration with a profile overlay (`Config.<profile>.toml`).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file("config/Config.toml"))
            .merge(Toml::file(format!("config/Config.{profile}.toml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file("config/config.json"))
            .extract()?;
        config
            .dispatcher
            .validate()
            .context("Invalid [dispatcher] configuration")?;

        Ok(config)
    }
}
