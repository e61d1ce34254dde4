//! Configuration trait shared by Meridian components.
//!
//! Components load a TOML file, apply `MERIDIAN_*` environment overrides, then
//! validate. Defaults come from `Default`.

use crate::errors::MeridianError;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Core trait for Meridian configuration types
pub trait MeridianConfig: Clone + Default + Send + Sync + 'static {
    /// Prefix of the environment variables that override this configuration
    const ENV_PREFIX: &'static str;

    /// Get default configuration values
    fn defaults() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    fn load_from_file(path: &Path) -> Result<Self, MeridianError>
    where
        Self: DeserializeOwned,
    {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MeridianError::internal(format!("Failed to read config file: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    fn from_toml_str(content: &str) -> Result<Self, MeridianError>
    where
        Self: DeserializeOwned,
    {
        toml::from_str(content).map_err(|e| MeridianError::invalid(format!("Invalid TOML: {e}")))
    }

    /// Set a single value by its lower-case key
    fn set_from_string(&mut self, key: &str, value: &str) -> Result<(), MeridianError>;

    /// Apply every environment variable carrying [`Self::ENV_PREFIX`]
    fn merge_with_env(&mut self) -> Result<(), MeridianError> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply overrides from `(name, value)` pairs carrying [`Self::ENV_PREFIX`]
    fn merge_with_vars<I>(&mut self, vars: I) -> Result<(), MeridianError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix(Self::ENV_PREFIX) {
                self.set_from_string(&key.to_lowercase(), &value)?;
            }
        }
        Ok(())
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), MeridianError>;
}

/// Parse a numeric override, naming the key on failure.
pub fn parse_u64(key: &str, value: &str) -> Result<u64, MeridianError> {
    value
        .trim()
        .parse()
        .map_err(|e| MeridianError::invalid(format!("{key}: expected an integer, got {value:?} ({e})")))
}

/// Parse a boolean override, naming the key on failure.
pub fn parse_bool(key: &str, value: &str) -> Result<bool, MeridianError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(MeridianError::invalid(format!(
            "{key}: expected a boolean, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_u64("k", " 42 ").unwrap(), 42);
        assert!(parse_u64("k", "x").is_err());
        assert!(parse_bool("k", "YES").unwrap());
        assert!(!parse_bool("k", "0").unwrap());
        assert!(parse_bool("k", "maybe").is_err());
    }
}
