//! Unit sources
//!
//! A source turns some transport into a stream of [`UnitStatus`] records on
//! a pipeline's inbound channel. Transport and decode failures stay inside
//! the source: they are logged, never sent down the channel.

mod jsonl;
mod systemctl;

pub use jsonl::JsonLinesSource;
pub use systemctl::{parse_list_units, SystemctlSource};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::collector::UnitSender;
use crate::error::Result;

/// Service manager instance being watched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bus {
    /// The system-wide manager
    System,
    /// The calling user's manager
    User,
}

impl Bus {
    /// Label used for pipelines and logs
    pub fn label(self) -> &'static str {
        match self {
            Bus::System => "system",
            Bus::User => "user",
        }
    }

    /// Extra `systemctl` arguments selecting this manager
    pub fn systemctl_args(self) -> &'static [&'static str] {
        match self {
            Bus::System => &["--system"],
            Bus::User => &["--user"],
        }
    }
}

impl std::fmt::Display for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Producer of unit records for one pipeline
#[async_trait]
pub trait UnitSource: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Whether a failure of this source stops the collector. Optional
    /// sources only log their failure.
    fn required(&self) -> bool {
        true
    }

    /// Feed records into `tx` until the transport ends or `cancel` fires.
    ///
    /// Returning drops `tx`, which closes the pipeline's inbound channel.
    async fn run(self: Box<Self>, tx: UnitSender, cancel: CancellationToken) -> Result<()>;
}
