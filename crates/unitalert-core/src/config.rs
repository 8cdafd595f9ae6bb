//! Configuration management for unitalert

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::alerting::BaselinePolicy;
use crate::error::{Error, Result};

/// Prefix for environment variable overrides, e.g. `UNITALERT__AGENT__FREQUENCY=5s`
pub const ENV_PREFIX: &str = "UNITALERT";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Batching and filtering
    pub agent: AgentConfig,

    /// Where unit records come from
    pub source: SourceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics exporter
    pub metrics: MetricsConfig,

    /// Notifier tables keyed by sink name
    pub notifications: BTreeMap<String, Vec<serde_json::Value>>,
}

/// Batching and filtering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// How often pending alerts are flushed to the notifiers
    #[serde(with = "humantime_serde")]
    pub frequency: Duration,
    /// Unit names that never alert
    pub ignore: Vec<String>,
    /// Which records update the per-unit comparison baseline
    pub baseline: BaselinePolicy,
    /// Flush a half-filled batch when the pipeline stops
    pub flush_on_shutdown: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            frequency: Duration::from_secs(1),
            ignore: Vec::new(),
            baseline: BaselinePolicy::default(),
            flush_on_shutdown: true,
        }
    }
}

/// Kind of unit source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Poll `systemctl list-units`
    #[default]
    Systemctl,
    /// JSON lines on standard input
    Stdin,
    /// JSON lines from a file
    File,
}

/// Unit source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source kind
    pub kind: SourceKind,
    /// Poll interval for the systemctl source
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Watch the system manager
    pub system: bool,
    /// Watch the user manager
    pub user: bool,
    /// `systemctl` executable used by the systemctl source
    pub program: String,
    /// Input path for the file source
    pub path: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            poll_interval: Duration::from_secs(2),
            system: true,
            user: true,
            program: "systemctl".to_string(),
            path: None,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address for the Prometheus scrape endpoint; disabled when unset
    pub listen: Option<SocketAddr>,
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "unitalert")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// The file [`Config::load`] reads: `path` if given, else the default
    pub fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
        path.map(Path::to_path_buf).or_else(Self::default_path)
    }

    /// Load configuration from a TOML file plus environment overrides.
    ///
    /// A missing file is not an error: defaults are used instead.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = Self::resolve_path(path).filter(|p| p.exists()) {
            let raw = std::fs::read_to_string(&path)?;
            builder = builder.add_source(File::from_str(&expand_env(&raw), FileFormat::Toml));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("agent.ignore")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text, without environment overrides
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(File::from_str(&expand_env(raw), FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.agent.frequency.is_zero() {
            return Err(Error::validation("agent.frequency must be greater than zero"));
        }

        match self.source.kind {
            SourceKind::Systemctl => {
                if self.source.poll_interval.is_zero() {
                    return Err(Error::validation("source.poll_interval must be greater than zero"));
                }
                if !self.source.system && !self.source.user {
                    return Err(Error::validation(
                        "source.system and source.user are both disabled",
                    ));
                }
            }
            SourceKind::File if self.source.path.is_none() => {
                return Err(Error::validation("source.path is required for the file source"));
            }
            SourceKind::File | SourceKind::Stdin => {}
        }

        Ok(())
    }
}

static ENV_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([^}]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid env var pattern")
});

/// Replace `$VAR` and `${VAR}` with values from the environment.
///
/// Unset variables expand to the empty string.
pub fn expand_env(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &Captures<'_>| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}
