//! Configuration loading with `MCP_GATEWAY_*` environment overrides (spec §6).

use std::path::Path;

use crate::domains::GatewayConfig;
use crate::error::{ConfigError, ConfigResult};

const ENV_PREFIX: &str = "MCP_GATEWAY";

/// Loads a [`GatewayConfig`] from YAML with environment variable overrides
/// layered on top, mirroring the precedence teacher-style loaders use:
/// file values first, then any matching `MCP_GATEWAY_*` env var wins.
pub struct ConfigLoader {
    prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { prefix: ENV_PREFIX.to_string() }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<GatewayConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: GatewayConfig = serde_yaml::from_str(&content)?;
        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;
        Ok(config)
    }

    pub fn from_env(&self) -> ConfigResult<GatewayConfig> {
        let mut config = GatewayConfig::default();
        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;
        Ok(config)
    }

    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<GatewayConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    fn env_var(&self, suffix: &str) -> Option<String> {
        std::env::var(format!("{}_{}", self.prefix, suffix)).ok()
    }

    fn apply_env_overrides(&self, config: &mut GatewayConfig) -> ConfigResult<()> {
        if let Some(raw) = self.env_var("SESSION_MAX") {
            config.session.max = self.parse_env("SESSION_MAX", &raw)?;
        }
        if let Some(raw) = self.env_var("SESSION_TTL") {
            config.session.ttl =
                humantime::parse_duration(&raw).map_err(|e| ConfigError::Env { name: "SESSION_TTL".to_string(), reason: e.to_string() })?;
        }
        if let Some(raw) = self.env_var("RESILIENCE_ENABLED") {
            config.resilience.enabled = self.parse_env("RESILIENCE_ENABLED", &raw)?;
        }
        if let Some(raw) = self.env_var("RESILIENCE_VOLUME_THRESHOLD") {
            config.resilience.volume_threshold = self.parse_env("RESILIENCE_VOLUME_THRESHOLD", &raw)?;
        }
        if let Some(raw) = self.env_var("RESILIENCE_ERROR_THRESHOLD_PERCENTAGE") {
            config.resilience.error_threshold_percentage = self.parse_env("RESILIENCE_ERROR_THRESHOLD_PERCENTAGE", &raw)?;
        }
        if let Some(raw) = self.env_var("GUARDRAILS_PROFILE") {
            config.guardrails.profile = raw;
        }
        if let Some(raw) = self.env_var("VALIDATION_TRUST") {
            config.validation.trust = raw;
        }
        if let Some(raw) = self.env_var("DAEMON_SOCKET_PATH") {
            config.daemon.socket_path = Some(raw);
        }
        if let Some(raw) = self.env_var("POLICY_LOCK") {
            config.policy.lock = self.parse_env("POLICY_LOCK", &raw)?;
        }
        if let Some(raw) = self.env_var("ERRORS_EXPOSE_DETAILS") {
            config.errors.expose_details = self.parse_env("ERRORS_EXPOSE_DETAILS", &raw)?;
        }
        Ok(())
    }

    fn parse_env<T: std::str::FromStr>(&self, name: &str, raw: &str) -> ConfigResult<T> {
        raw.parse().map_err(|_| ConfigError::Env { name: name.to_string(), reason: format!("could not parse '{raw}'") })
    }

    fn validate(&self, config: &GatewayConfig) -> ConfigResult<()> {
        if config.session.max == 0 {
            return Err(ConfigError::Validation("session.max must be greater than zero".to_string()));
        }
        if !(0.0..=100.0).contains(&config.resilience.error_threshold_percentage) {
            return Err(ConfigError::Validation("resilience.error_threshold_percentage must be within 0..=100".to_string()));
        }
        if !matches!(config.validation.trust.as_str(), "auto" | "trusted" | "untrusted") {
            return Err(ConfigError::Validation(format!("validation.trust must be auto|trusted|untrusted, got '{}'", config.validation.trust)));
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_defaults_from_env_with_no_file() {
        let loader = ConfigLoader::new();
        let config = loader.from_env().unwrap();
        assert_eq!(config.session.max, 100);
    }

    #[test]
    fn file_values_are_overridden_by_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "session:\n  max: 5\n").unwrap();

        std::env::set_var("MCP_GATEWAY_SESSION_MAX", "42");
        let loader = ConfigLoader::new();
        let config = loader.from_file(file.path()).unwrap();
        assert_eq!(config.session.max, 42);
        std::env::remove_var("MCP_GATEWAY_SESSION_MAX");
    }

    #[test]
    fn rejects_invalid_trust_value() {
        std::env::set_var("MCP_GATEWAY_VALIDATION_TRUST", "maybe");
        let loader = ConfigLoader::new();
        let err = loader.from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        std::env::remove_var("MCP_GATEWAY_VALIDATION_TRUST");
    }

    #[test]
    fn rejects_zero_session_max() {
        std::env::set_var("MCP_GATEWAY_SESSION_MAX", "0");
        let loader = ConfigLoader::new();
        let err = loader.from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        std::env::remove_var("MCP_GATEWAY_SESSION_MAX");
    }
}
