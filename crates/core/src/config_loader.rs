use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

pub struct ConfigLoader;

impl ConfigLoader {
    fn base() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file("config/Config.toml"))
    }

    fn env() -> Env {
        // APP_GATEWAY__PORT=4001 -> gateway.port
        Env::prefixed("APP_").split("__")
    }

    /// Loads application configuration: defaults, then `config/Config.toml`,
    /// then `APP_` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file or variable cannot be parsed.
    pub fn load() -> Result<AppConfig> {
        Self::base()
            .merge(Self::env())
            .extract()
            .context("failed to load configuration")
    }

    /// Loads application configuration with `config/Config.{profile}.toml`
    /// layered over the base file.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file or variable cannot be parsed.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        Self::base()
            .merge(Toml::file(format!("config/Config.{profile}.toml")))
            .merge(Self::env())
            .extract()
            .with_context(|| format!("failed to load configuration for profile '{profile}'"))
    }
}
