use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::model::{LabelSelector, ObjectKey};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

// ── Top-level config ──────────────────────────────────────────

/// Controller configuration.
///
/// Every field has a default matching the production deployment, so an empty
/// TOML document is a valid config. Environment variables of the form
/// `MESHROUTE_SECTION_KEY` override file values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub aggregate: AggregateConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path, then apply env overrides and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Read and parse a config file only.
    ///
    /// For callers layering further overrides on top: they apply the env
    /// overrides and call [`validate`](Self::validate) themselves.
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&content)?)
    }

    /// Defaults plus env overrides; used when no config file is given.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `MESHROUTE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok().filter(|v| !v.is_empty()));
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MESHROUTE_SOURCE_LABEL") {
            set_parsed("MESHROUTE_SOURCE_LABEL", &v, &mut self.source.label);
        }
        if let Some(v) = lookup("MESHROUTE_AGGREGATE_NAME") {
            self.aggregate.name = v;
        }
        if let Some(v) = lookup("MESHROUTE_AGGREGATE_NAMESPACE") {
            self.aggregate.namespace = v;
        }
        if let Some(v) = lookup("MESHROUTE_AGGREGATE_LABEL") {
            set_parsed("MESHROUTE_AGGREGATE_LABEL", &v, &mut self.aggregate.label);
        }
        if let Some(v) = lookup("MESHROUTE_AGGREGATE_GATEWAY") {
            self.aggregate.gateway = v;
        }
        if let Some(v) = lookup("MESHROUTE_AGGREGATE_WILDCARD_HOST") {
            self.aggregate.wildcard_host = v;
        }
        if let Some(v) = lookup("MESHROUTE_AGGREGATE_DUPLICATE_POLICY") {
            set_parsed(
                "MESHROUTE_AGGREGATE_DUPLICATE_POLICY",
                &v,
                &mut self.aggregate.duplicate_policy,
            );
        }
        if let Some(v) = lookup("MESHROUTE_FALLBACK_SERVICE_ENTRY") {
            self.fallback.service_entry = v;
        }
        if let Some(v) = lookup("MESHROUTE_FALLBACK_NAMESPACE") {
            self.fallback.namespace = v;
        }
        if let Some(v) = lookup("MESHROUTE_FALLBACK_RULE_NAME") {
            self.fallback.rule_name = v;
        }
        if let Some(v) = lookup("MESHROUTE_FLUSH_INTERVAL_SECS") {
            set_parsed("MESHROUTE_FLUSH_INTERVAL_SECS", &v, &mut self.flush.interval_secs);
        }
        if let Some(v) = lookup("MESHROUTE_METRICS_ENABLED") {
            set_parsed("MESHROUTE_METRICS_ENABLED", &v, &mut self.metrics.enabled);
        }
        if let Some(v) = lookup("MESHROUTE_METRICS_PORT") {
            set_parsed("MESHROUTE_METRICS_PORT", &v, &mut self.metrics.port);
        }
    }

    /// Reject configs the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("aggregate.name", &self.aggregate.name),
            ("aggregate.namespace", &self.aggregate.namespace),
            ("aggregate.gateway", &self.aggregate.gateway),
            ("fallback.service_entry", &self.fallback.service_entry),
            ("fallback.namespace", &self.fallback.namespace),
            ("fallback.rule_name", &self.fallback.rule_name),
            ("source.label.key", &self.source.label.key),
            ("aggregate.label.key", &self.aggregate.label.key),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must not be empty")));
            }
        }
        if self.flush.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "flush.interval_secs must be greater than zero".into(),
            ));
        }
        if self.source.label == self.aggregate.label {
            return Err(ConfigError::Invalid(format!(
                "source label and aggregate label are both '{}'; the aggregate would feed itself",
                self.source.label
            )));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  source:     label={}", self.source.label);
        tracing::info!(
            "  aggregate:  {} label={} gateway={} wildcard={} duplicates={}",
            self.aggregate.key(),
            self.aggregate.label,
            self.aggregate.gateway,
            self.aggregate.wildcard_host,
            self.aggregate.duplicate_policy,
        );
        tracing::info!(
            "  fallback:   service_entry={} rule={}",
            self.fallback.key(),
            self.fallback.rule_name,
        );
        tracing::info!("  flush:      every {}s", self.flush.interval_secs);
        if self.metrics.enabled {
            tracing::info!("  metrics:    port={}", self.metrics.port);
        } else {
            tracing::info!("  metrics:    disabled");
        }
    }
}

fn set_parsed<T: FromStr>(key: &str, raw: &str, target: &mut T)
where
    T::Err: fmt::Display,
{
    match raw.parse::<T>() {
        Ok(v) => *target = v,
        Err(e) => warn!(key, value = raw, error = %e, "ignoring invalid config override"),
    }
}

// ── Source resources ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Marker label opting a VirtualService into the aggregate.
    #[serde(default = "default_source_label")]
    pub label: LabelSelector,
}

fn default_source_label() -> LabelSelector {
    LabelSelector::new("network", "edge")
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            label: default_source_label(),
        }
    }
}

// ── Aggregate ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateConfig {
    #[serde(default = "default_aggregate_name")]
    pub name: String,
    #[serde(default = "default_infra_namespace")]
    pub namespace: String,
    /// Label stamped on the aggregate itself.
    #[serde(default = "default_aggregate_label")]
    pub label: LabelSelector,
    #[serde(default = "default_gateway")]
    pub gateway: String,
    #[serde(default = "default_wildcard_host")]
    pub wildcard_host: String,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

fn default_aggregate_name() -> String {
    "mesh-routing".into()
}

fn default_infra_namespace() -> String {
    "infra".into()
}

fn default_aggregate_label() -> LabelSelector {
    LabelSelector::new("network", "mesh")
}

fn default_gateway() -> String {
    "mesh".into()
}

fn default_wildcard_host() -> String {
    "*.example.internal".into()
}

impl AggregateConfig {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            name: default_aggregate_name(),
            namespace: default_infra_namespace(),
            label: default_aggregate_label(),
            gateway: default_gateway(),
            wildcard_host: default_wildcard_host(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

/// What appending a rule that is already present does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Log the duplicate and record the new owner on the existing entry.
    #[default]
    Skip,
    /// Log the duplicate and append it anyway (legacy behaviour).
    Append,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => f.write_str("skip"),
            Self::Append => f.write_str("append"),
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "append" => Ok(Self::Append),
            other => Err(ConfigError::Invalid(format!(
                "unknown duplicate policy '{other}' (expected skip or append)"
            ))),
        }
    }
}

// ── Fallback destination ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// ServiceEntry whose first host receives unmatched traffic.
    #[serde(default = "default_fallback_service_entry")]
    pub service_entry: String,
    #[serde(default = "default_infra_namespace")]
    pub namespace: String,
    #[serde(default = "default_fallback_rule_name")]
    pub rule_name: String,
}

fn default_fallback_service_entry() -> String {
    "haproxy".into()
}

fn default_fallback_rule_name() -> String {
    "default-haproxy".into()
}

impl FallbackConfig {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.service_entry)
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            service_entry: default_fallback_service_entry(),
            namespace: default_infra_namespace(),
            rule_name: default_fallback_rule_name(),
        }
    }
}

// ── Flush ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushConfig {
    #[serde(default = "default_flush_interval_secs")]
    pub interval_secs: u64,
}

fn default_flush_interval_secs() -> u64 {
    30
}

impl FlushConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_flush_interval_secs(),
        }
    }
}

// ── Metrics ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    2442
}

impl MetricsConfig {
    /// The port to serve on, or `None` when disabled.
    pub fn listen_port(&self) -> Option<u16> {
        self.enabled.then_some(self.port)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}
