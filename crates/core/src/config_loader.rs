use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};

/// Environment variable prefix; nested keys are separated by `__`
/// (e.g. `OPT_ALGO_MONITOR__POLL_INTERVAL_SECS=10`).
pub const ENV_PREFIX: &str = "OPT_ALGO_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration by merging TOML, environment variables, and JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or a value is invalid.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config/Config.toml", None)
    }

    /// Loads application configuration with a specific profile layered on top.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or a value is invalid.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        Self::load_from("config/Config.toml", Some(profile))
    }

    /// Loads from an explicit base file. Missing files are skipped, so a bare
    /// environment still yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or a value is invalid.
    pub fn load_from(path: &str, profile: Option<&str>) -> Result<AppConfig> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path));

        if let Some(profile) = profile {
            let profile_path = match path.strip_suffix(".toml") {
                Some(stem) => format!("{stem}.{profile}.toml"),
                None => format!("{path}.{profile}"),
            };
            figment = figment.merge(Toml::file(profile_path));
        }

        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file("config/Config.json"))
            .extract()
            .context("failed to load configuration")?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn missing_file_yields_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = ConfigLoader::load_from("config/Config.toml", None)
                .map_err(|e| e.to_string())?;
            assert_eq!(config.scheduler.check_interval_secs, 60);
            assert_eq!(config.monitor.max_checks, 2880);
            Ok(())
        });
    }

    #[test]
    fn profile_and_env_override_base_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/Config.toml",
                r#"
                [monitor]
                poll_interval_secs = 15

                [exchange]
                cutover = "15:30"
                "#,
            )?;
            jail.create_file(
                "config/Config.paper.toml",
                r#"
                [monitor]
                breakeven_threshold_pct = "7.5"
                "#,
            )?;
            jail.set_env("OPT_ALGO_SCHEDULER__CHECK_INTERVAL_SECS", "30");

            let config = ConfigLoader::load_with_profile("paper").map_err(|e| e.to_string())?;
            assert_eq!(config.monitor.poll_interval_secs, 15);
            assert_eq!(config.monitor.breakeven_threshold_pct, dec!(7.5));
            assert_eq!(config.exchange.cutover, "15:30");
            assert_eq!(config.scheduler.check_interval_secs, 30);
            Ok(())
        });
    }

    #[test]
    fn invalid_value_fails_the_load() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/Config.toml",
                r#"
                [exchange]
                timezone = "Nowhere/Special"
                "#,
            )?;
            assert!(ConfigLoader::load().is_err());
            Ok(())
        });
    }
}
