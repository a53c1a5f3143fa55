//! Configuration of the label enforcer, read from TOML.
//!
//! Every field is optional. What a file leaves out falls back to the built-in example
//! inputs:
//!
//! ```toml
//! expressions = ['up{job="node"}']
//! metrics = """
//! # TYPE up gauge
//! up 1
//! """
//!
//! [labels]
//! app = "app"
//! region = "cn"
//!
//! [enforcer]
//! match_policy = "preserve"
//! traversal = "recursive"
//! ```
use crate::{
    enforce::{
        EnforcedLabels,
        LabelEnforcer,
        MatchPolicy,
        Traversal,
    },
    promql::is_valid_label_name,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    io,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
};
use tracing::debug;

const DEFAULT_EXPRESSIONS: [&str; 3] = [
    r#"container_cpu_usage_seconds_total{app="",namespace="kube-system",container=~".*apiserver.*"}[5m]"#,
    r#"container_cpu_usage_seconds_total{app="",namespace="kube-system",container=~".*apiserver.*"}"#,
    r#"container_cpu_usage_seconds_total{namespace="kube-system",container=~".*apiserver.*"}[5m]"#,
];

const DEFAULT_METRICS: &str = r#"
# HELP promhttp_metric_handler_requests_total Total number of scrapes by HTTP status code.
# TYPE promhttp_metric_handler_requests_total counter
promhttp_metric_handler_requests_total{code="200"} 0
promhttp_metric_handler_requests_total{code="500"} 0
promhttp_metric_handler_requests_total{code="503"} 0
"#;

/// Errors while loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("`{0}` is not a valid label name")]
    InvalidLabelName(String),
}

/// Root configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// PromQL expressions to enforce the labels on
    pub expressions: Vec<String>,
    /// Exposition text to append the labels to
    pub metrics: String,
    /// The label pairs to enforce
    pub labels: EnforcedLabels,
    pub enforcer: EnforcerConfig,
}

/// How the labels are forced onto expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnforcerConfig {
    pub match_policy: MatchPolicy,
    pub traversal: Traversal,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            expressions: DEFAULT_EXPRESSIONS.map(str::to_owned).to_vec(),
            metrics: DEFAULT_METRICS.to_owned(),
            labels: EnforcedLabels::from_iter([("app", "app"), ("region", "cn")]),
            enforcer: EnforcerConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        text.parse()
    }

    /// Every enforced label must have a valid Prometheus label name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.labels.keys().find(|name| !is_valid_label_name(name)) {
            Some(name) => Err(ConfigError::InvalidLabelName(name.clone())),
            None => Ok(()),
        }
    }

    pub fn enforcer(&self) -> LabelEnforcer {
        LabelEnforcer::new(
            self.labels.clone(),
            self.enforcer.match_policy,
            self.enforcer.traversal,
        )
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    /// Parse and validate a TOML configuration.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}
