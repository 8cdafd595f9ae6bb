//! Notification sinks for unit alerts
//!
//! A [`Notifier`] accepts one flushed batch of units at a time. Delivery is
//! fire-and-forget from the pipeline's point of view: sinks log their own
//! failures and never hand errors back.

mod influxdb;
mod log;
#[cfg(all(feature = "native", unix, not(target_os = "macos")))]
mod native;
mod slack;

pub use self::influxdb::{InfluxConfig, InfluxNotifier};
pub use self::log::LogNotifier;
#[cfg(all(feature = "native", unix, not(target_os = "macos")))]
pub use self::native::{NativeConfig, NativeNotifier};
pub use self::slack::{SlackConfig, SlackNotifier};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::UnitStatus;

/// A destination for batches of alert-worthy units
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Deliver one batch. Failures are handled inside the sink.
    async fn alert(&self, units: &[UnitStatus]);
}

/// Builds a notifier from its configuration table
pub type NotifierFactory = fn(serde_json::Value) -> Result<Arc<dyn Notifier>>;

/// Lookup table of notifier factories keyed by name
pub struct NotifierRegistry {
    factories: HashMap<&'static str, NotifierFactory>,
}

impl NotifierRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with every built-in sink
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("log", |_| Ok(Arc::new(LogNotifier::new())));
        registry.register("slack", |table| {
            let config: SlackConfig = serde_json::from_value(table)?;
            Ok(Arc::new(SlackNotifier::new(config)?))
        });
        registry.register("influxdb", |table| {
            let config: InfluxConfig = serde_json::from_value(table)?;
            Ok(Arc::new(InfluxNotifier::new(config)?))
        });
        #[cfg(all(feature = "native", unix, not(target_os = "macos")))]
        registry.register("native", |table| {
            let config: NativeConfig = serde_json::from_value(table)?;
            Ok(Arc::new(NativeNotifier::new(config)))
        });
        registry
    }

    /// Register (or replace) a factory
    pub fn register(&mut self, name: &'static str, factory: NotifierFactory) {
        self.factories.insert(name, factory);
    }

    /// Registered sink names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Build a single notifier. Returns `None` for an unknown name.
    pub fn create(&self, name: &str, table: serde_json::Value) -> Option<Result<Arc<dyn Notifier>>> {
        self.factories.get(name).map(|factory| factory(table))
    }

    /// Build every configured notifier.
    ///
    /// Unknown sink names and tables that fail to build are logged and
    /// skipped. Falls back to the log sink when nothing could be built.
    pub fn build_all(&self, tables: &BTreeMap<String, Vec<serde_json::Value>>) -> Vec<Arc<dyn Notifier>> {
        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

        for (name, configs) in tables {
            if !self.factories.contains_key(name.as_str()) {
                warn!(notifier = %name, "Unknown notifier, skipping");
                continue;
            }

            info!(notifier = %name, count = configs.len(), "Loading notifier");
            for (index, table) in configs.iter().enumerate() {
                match self.create(name, table.clone()) {
                    Some(Ok(notifier)) => notifiers.push(notifier),
                    Some(Err(e)) => {
                        warn!(notifier = %name, index, error = %e, "Failed to load notifier");
                    }
                    None => {}
                }
            }
        }

        if notifiers.is_empty() {
            info!("No notifiers configured, using log notifier");
            notifiers.push(Arc::new(LogNotifier::new()));
        }

        notifiers
    }
}

impl Default for NotifierRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Errors raised inside a sink while delivering a batch
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Request failed or the endpoint rejected it
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Sink cannot deliver with its configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Socket or file failure
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
