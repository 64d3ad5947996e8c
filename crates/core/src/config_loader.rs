use crate::config::StrategyConfig;
use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads strategy configuration by merging defaults, TOML, environment variables, and JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the result fails validation.
    pub fn load() -> Result<StrategyConfig, ConfigError> {
        Self::extract(
            Self::base()
                .merge(Toml::file("config/Strategy.toml"))
                .merge(Env::prefixed("VAULT_").split("__"))
                .join(Json::file("config/Strategy.json")),
        )
    }

    /// Loads strategy configuration with a specific profile overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the result fails validation.
    pub fn load_with_profile(profile: &str) -> Result<StrategyConfig, ConfigError> {
        Self::extract(
            Self::base()
                .merge(Toml::file("config/Strategy.toml"))
                .merge(Toml::file(format!("config/Strategy.{profile}.toml")))
                .merge(Env::prefixed("VAULT_").split("__"))
                .join(Json::file("config/Strategy.json")),
        )
    }

    /// Loads strategy configuration from a single TOML file plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<StrategyConfig, ConfigError> {
        Self::extract(
            Self::base()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("VAULT_").split("__")),
        )
    }

    fn base() -> Figment {
        Figment::from(Serialized::defaults(StrategyConfig::default()))
    }

    fn extract(figment: Figment) -> Result<StrategyConfig, ConfigError> {
        let config: StrategyConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}
