//! Scatter-gather configuration
//!
//! Loads the router configuration from a TOML file:
//!
//! ```toml
//! [router]
//! name = "order-fanout"
//! max_concurrency = 2
//! timeout_ms = 5000
//! strategy = "collect_map"
//!
//! [logging]
//! level = "debug"
//!
//! [[routes]]
//! name = "inventory"
//! url = "http://inventory.internal/reserve"
//!
//! [[routes]]
//! name = "billing"
//! url = "http://billing.internal/authorize"
//! ```
//!
//! Selected values can be overridden from the environment, see
//! [`AppConfig::apply_env_overrides`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sg_common::{FailurePolicy, StrategyKind};
use tracing::{debug, info};

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    #[serde(default = "default_router_name")]
    pub name: String,
    /// Defaults to the number of routes
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Deadline for a whole fork-join invocation
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Store the aggregate in this variable instead of replacing the payload
    #[serde(default)]
    pub target: Option<String>,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            name: default_router_name(),
            max_concurrency: None,
            timeout_ms: None,
            strategy: StrategyKind::default(),
            failure_policy: FailurePolicy::default(),
            target: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_route_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Sent as a Bearer token when present
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_router_name() -> String {
    "scatter-gather".to_string()
}

fn default_route_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl AppConfig {
    /// Load, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;

        info!(
            path = %path.display(),
            router = %config.router.name,
            routes = config.routes.len(),
            strategy = %config.router.strategy,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse without validating
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SG_MAX_CONCURRENCY").and_then(|v| v.parse().ok()) {
            debug!(max_concurrency = v, "Overriding max concurrency from environment");
            self.router.max_concurrency = Some(v);
        }
        if let Some(v) = lookup("SG_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            debug!(timeout_ms = v, "Overriding timeout from environment");
            self.router.timeout_ms = Some(v);
        }
        if let Some(v) = lookup("SG_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("SG_LOG_JSON").and_then(|v| v.parse().ok()) {
            self.logging.json = v;
        }
        if let Some(v) = lookup("SG_METRICS_ENABLED").and_then(|v| v.parse().ok()) {
            self.metrics.enabled = v;
        }
        if let Some(v) = lookup("SG_METRICS_PORT").and_then(|v| v.parse().ok()) {
            self.metrics.port = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.routes.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "at least 2 routes are required for scatter-gather, found {}",
                self.routes.len()
            )));
        }

        let mut names = HashSet::new();
        for (index, route) in self.routes.iter().enumerate() {
            if route.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("route {} has an empty name", index)));
            }
            if !names.insert(route.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate route name '{}'", route.name)));
            }
            if route.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("route '{}' has no url", route.name)));
            }
            if route.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "route '{}' timeout_ms must be greater than 0",
                    route.name
                )));
            }
            if route.connect_timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "route '{}' connect_timeout_ms must be greater than 0",
                    route.name
                )));
            }
        }

        if self.router.max_concurrency == Some(0) {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".to_string()));
        }
        if self.router.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("timeout_ms must be greater than 0".to_string()));
        }
        if matches!(self.router.target.as_deref(), Some(t) if t.trim().is_empty()) {
            return Err(ConfigError::Invalid("target must not be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [router]
        name = "order-fanout"
        max_concurrency = 2
        timeout_ms = 5000
        strategy = "collect_list"

        [[routes]]
        name = "inventory"
        url = "http://localhost:9001/reserve"

        [[routes]]
        name = "billing"
        url = "http://localhost:9002/authorize"
        timeout_ms = 1500
        auth_token = "secret"
    "#;

    #[test]
    fn test_parse_with_defaults() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.router.name, "order-fanout");
        assert_eq!(config.router.max_concurrency, Some(2));
        assert_eq!(config.router.strategy, StrategyKind::CollectList);
        assert_eq!(config.router.failure_policy, FailurePolicy::Marker);
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].timeout_ms, 30_000);
        assert_eq!(config.routes[1].timeout_ms, 1500);
        assert_eq!(config.routes[1].auth_token.as_deref(), Some("secret"));
        assert_eq!(config.logging.level, "info");
        assert!(!config.metrics.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_single_route_is_rejected() {
        let config = AppConfig::from_toml_str(
            r#"
            [[routes]]
            name = "only"
            url = "http://localhost/only"
            "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("at least 2 routes")));
    }

    #[test]
    fn test_duplicate_route_names_rejected() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.routes[1].name = "inventory".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.router.max_concurrency = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.routes[0].connect_timeout_ms = 0;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("connect_timeout_ms")));
    }

    #[test]
    fn test_overrides() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("SG_MAX_CONCURRENCY", "7"),
            ("SG_TIMEOUT_MS", "not-a-number"),
            ("SG_LOG_JSON", "true"),
            ("SG_METRICS_PORT", "9100"),
        ]);

        config.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.router.max_concurrency, Some(7));
        assert_eq!(config.router.timeout_ms, Some(5000));
        assert!(config.logging.json);
        assert_eq!(config.metrics.port, 9100);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.routes[0].name, "inventory");
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
