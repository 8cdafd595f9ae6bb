//! # unitalert
//!
//! Watches service manager units and forwards failure transitions to
//! pluggable alert sinks.
//!
//! ## Architecture
//!
//! - **Source**: turns `systemctl` output or JSON lines into unit records
//! - **Alerting**: filters and change detection over unit records
//! - **Collector**: per-manager batching pipelines with a flush timer
//! - **Notifier**: log, Slack, InfluxDB and desktop sinks
//!
//! ## Quick Start
//!
//! ```bash
//! # Watch the system and user managers, alerting to the log
//! unitalert debug --frequency 5s
//!
//! # Use a configuration file
//! unitalert --config /etc/unitalert/config.toml
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod collector;
pub mod config;
pub mod error;
pub mod models;
pub mod notifier;
pub mod source;
pub mod telemetry;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{BaselinePolicy, ChangeDetector, Filter};
    pub use crate::collector::{Collector, Pipeline, PipelineConfig};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::notifier::{Notifier, NotifierRegistry};
}
