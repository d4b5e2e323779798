//! Runtime configuration.
//!
//! Defaults describe the built-in providers. A JSON file named by
//! `CPIX_KEYFLOW_CONFIG` replaces the defaults, and individual environment
//! variables override either.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::providers::Provider;

pub const CONFIG_PATH_VAR: &str = "CPIX_KEYFLOW_CONFIG";
pub const PROVIDERS_VAR: &str = "CPIX_KEYFLOW_PROVIDERS";
pub const FAILURE_POLICY_VAR: &str = "CPIX_KEYFLOW_FAILURE_POLICY";
pub const NETWORK_TIMEOUT_VAR: &str = "CPIX_KEYFLOW_NETWORK_TIMEOUT_MS";

/// Default bound on every network call - 10 seconds
const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 10_000;

/// What the orchestrator does when one provider's run fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let sibling runs finish and report every outcome.
    #[default]
    Isolate,
    /// Cancel all in-flight sibling runs on the first failure.
    AbortAll,
}

impl FailurePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "isolate" => Some(FailurePolicy::Isolate),
            "abort" | "abort_all" => Some(FailurePolicy::AbortAll),
            _ => None,
        }
    }
}

/// Fixed configuration for one provider pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: Provider,
    /// Secret store namespace holding the certificate.
    pub namespace: String,
    pub certificate_location: String,
    pub key_server_url: String,
    /// Downstream topic the content key is published on.
    pub topic: String,
}

impl ProviderConfig {
    /// Built-in defaults for a provider.
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Sky => Self {
                provider,
                namespace: "Sky".to_string(),
                certificate_location: "Sky cert location".to_string(),
                key_server_url: "https://sky.drmserver.com".to_string(),
                topic: "Sky".to_string(),
            },
            Provider::Fire => Self {
                provider,
                namespace: "Fire".to_string(),
                certificate_location: "Fire cert location".to_string(),
                key_server_url: "https://fire.drmserver.com".to_string(),
                topic: "Fire".to_string(),
            },
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,
    /// Content identifier requested from every key server.
    #[serde(default = "default_content_id")]
    pub content_id: String,
}

fn default_network_timeout_ms() -> u64 {
    DEFAULT_NETWORK_TIMEOUT_MS
}

fn default_content_id() -> String {
    "urn:content:default".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: Provider::all()
                .iter()
                .map(|p| ProviderConfig::for_provider(*p))
                .collect(),
            failure_policy: FailurePolicy::default(),
            network_timeout_ms: DEFAULT_NETWORK_TIMEOUT_MS,
            content_id: default_content_id(),
        }
    }
}

impl Config {
    /// Load configuration from the optional file and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|var| std::env::var(var).ok())
    }

    /// Load through an arbitrary variable lookup.
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = match lookup(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        let config = base.with_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(list) = lookup(PROVIDERS_VAR) {
            let mut selected = Vec::new();
            for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let provider: Provider = name.parse()?;
                let config = self
                    .providers
                    .iter()
                    .find(|c| c.provider == provider)
                    .cloned()
                    .unwrap_or_else(|| ProviderConfig::for_provider(provider));
                selected.push(config);
            }
            self.providers = selected;
        }

        if let Some(value) = lookup(FAILURE_POLICY_VAR) {
            self.failure_policy =
                FailurePolicy::parse(&value).ok_or_else(|| ConfigError::InvalidEnv {
                    var: FAILURE_POLICY_VAR.to_string(),
                    value: value.clone(),
                })?;
        }

        if let Some(value) = lookup(NETWORK_TIMEOUT_VAR) {
            self.network_timeout_ms =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    var: NETWORK_TIMEOUT_VAR.to_string(),
                    value: value.clone(),
                })?;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid("no providers configured".to_string()));
        }
        if self.network_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "network timeout must be non-zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.provider) {
                return Err(ConfigError::Invalid(format!(
                    "provider {} configured twice",
                    provider.provider
                )));
            }
            if provider.topic.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "provider {} has an empty topic",
                    provider.provider
                )));
            }
            if provider.key_server_url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "provider {} has an empty key server url",
                    provider.provider
                )));
            }
        }
        Ok(())
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn test_default_config_has_both_providers() {
        let config = Config::default();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.failure_policy, FailurePolicy::Isolate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_override_selects_subset() {
        let config = Config::default()
            .with_overrides(env(&[(PROVIDERS_VAR, " fire ")]))
            .unwrap();

        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].provider, Provider::Fire);
        assert_eq!(config.providers[0].topic, "Fire");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result = Config::default().with_overrides(env(&[(PROVIDERS_VAR, "sky,ice")]));
        assert!(matches!(result, Err(ConfigError::UnknownProvider(name)) if name == "ice"));
    }

    #[test]
    fn test_policy_and_timeout_overrides() {
        let config = Config::default()
            .with_overrides(env(&[
                (FAILURE_POLICY_VAR, "abort"),
                (NETWORK_TIMEOUT_VAR, "250"),
            ]))
            .unwrap();

        assert_eq!(config.failure_policy, FailurePolicy::AbortAll);
        assert_eq!(config.network_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let result = Config::default().with_overrides(env(&[(NETWORK_TIMEOUT_VAR, "soon")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let mut config = Config::default();
        config.providers.push(ProviderConfig::for_provider(Provider::Sky));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let raw = r#"{
            "providers": [{
                "provider": "Sky",
                "namespace": "Sky",
                "certificate_location": "vault://sky",
                "key_server_url": "https://sky.example",
                "topic": "sky-keys"
            }]
        }"#;

        let config = Config::from_json(raw).unwrap();
        assert_eq!(config.providers[0].topic, "sky-keys");
        assert_eq!(config.network_timeout_ms, DEFAULT_NETWORK_TIMEOUT_MS);
        assert_eq!(config.failure_policy, FailurePolicy::Isolate);
    }

    #[test]
    fn test_load_reads_file_named_by_env() {
        let path = std::env::temp_dir().join(format!("cpix-keyflow-{}.json", uuid::Uuid::new_v4()));
        let mut file_config = Config::default();
        file_config.providers.retain(|p| p.provider == Provider::Fire);
        file_config.providers[0].topic = "fire-keys".to_string();
        file_config.failure_policy = FailurePolicy::AbortAll;
        std::fs::write(&path, serde_json::to_string(&file_config).unwrap()).unwrap();

        let path_str = path.to_string_lossy().to_string();
        let loaded = Config::load_with(env(&[
            (CONFIG_PATH_VAR, path_str.as_str()),
            (NETWORK_TIMEOUT_VAR, "500"),
        ]));
        std::fs::remove_file(&path).unwrap();

        let loaded = loaded.unwrap();
        assert_eq!(loaded.providers.len(), 1);
        assert_eq!(loaded.providers[0].topic, "fire-keys");
        assert_eq!(loaded.failure_policy, FailurePolicy::AbortAll);
        assert_eq!(loaded.network_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let result = Config::load_with(env(&[(CONFIG_PATH_VAR, "/nonexistent/cpix-keyflow.json")]));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = Config::load_with(env(&[])).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_topic_rejected() {
        let mut config = Config::default();
        config.providers[1].topic = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("topic")));
    }

    #[test]
    fn test_empty_key_server_url_rejected() {
        let mut config = Config::default();
        config.providers[0].key_server_url = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("url")));
    }

    #[test]
    fn test_load_validates_overrides() {
        let result = Config::load_with(env(&[(NETWORK_TIMEOUT_VAR, "0")]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
