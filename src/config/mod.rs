//! Configuration: defaults merged with an optional file and a
//! `MAESTRO`-prefixed environment overlay.
//!
//! Read once at setup; the resulting `MaestroConfig` is handed to the
//! orchestrator and never re-read per request.

use crate::logging::LoggingConfig;
use crate::provider::RetryPolicy;
use crate::registry::CollisionPolicy;
use crate::types::{ExecutionMode, ValidationPolicy};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Global execution defaults, below per-call overrides and service
/// attributes in the resolution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDefaults {
    #[serde(default)]
    pub mode: ExecutionMode,

    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub priority: i32,
}

fn default_backend() -> String {
    "immediate".to_string()
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sync,
            backend: default_backend(),
            priority: 0,
        }
    }
}

/// Identity derivation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Origin segment for components that declare none.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Tokens stripped from the edges of derived names.
    #[serde(default)]
    pub strip_tokens: Vec<String>,

    #[serde(default)]
    pub collision_policy: CollisionPolicy,
}

fn default_namespace() -> String {
    "app".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            strip_tokens: Vec::new(),
            collision_policy: CollisionPolicy::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaestroConfig {
    #[serde(default)]
    pub execution: ExecutionDefaults,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub validation_policy: ValidationPolicy,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration: defaults, then an optional file, then the
    /// `MAESTRO_*` environment overlay (`__` separates nested keys).
    pub fn load(file: Option<&Path>) -> Result<MaestroConfig, ConfigError> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&MaestroConfig::default())?);
        if let Some(path) = file {
            let path = path.to_str().ok_or_else(|| {
                ConfigError::Message(format!("non-UTF-8 config path: {}", path.display()))
            })?;
            builder = builder.add_source(File::with_name(path));
        }
        let builder = builder.add_source(
            Environment::with_prefix("MAESTRO")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }

    /// Default configuration with no file or environment overlay.
    pub fn defaults() -> MaestroConfig {
        MaestroConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_hard_coded_fallbacks() {
        let config = ConfigLoader::defaults();
        assert_eq!(config.execution.mode, ExecutionMode::Sync);
        assert_eq!(config.execution.backend, "immediate");
        assert_eq!(config.execution.priority, 0);
        assert_eq!(config.validation_policy, ValidationPolicy::Lenient);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maestro.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "validation_policy = \"strict\"\n\n[execution]\nmode = \"deferred\"\nbackend = \"queued\"\npriority = 5\n\n[identity]\nnamespace = \"acme\"\nstrip_tokens = [\"Service\"]"
        )
        .unwrap();

        let config = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(config.execution.mode, ExecutionMode::Deferred);
        assert_eq!(config.execution.backend, "queued");
        assert_eq!(config.execution.priority, 5);
        assert_eq!(config.validation_policy, ValidationPolicy::Strict);
        assert_eq!(config.identity.namespace, "acme");
        assert_eq!(config.identity.strip_tokens, vec!["Service".to_string()]);
        // Untouched sections keep their defaults.
        assert_eq!(config.retry.max_attempts, 3);
    }
}
