//! Collector module - unit change batching
//!
//! The collector runs one pipeline per watched service manager. Each
//! pipeline is fed by its own unit source and flushes to the shared
//! notifiers; pipelines are independent peers.

mod pipeline;

pub use pipeline::{
    BatchState, Pipeline, PipelineConfig, PipelineStats, UnitReceiver, UnitSender,
};

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, SourceKind};
use crate::error::{Error, Result};
use crate::notifier::Notifier;
use crate::source::{Bus, JsonLinesSource, SystemctlSource, UnitSource};

/// The main collector service
pub struct Collector {
    config: Config,
    notifiers: Vec<Arc<dyn Notifier>>,
    cancel: CancellationToken,
}

impl Collector {
    /// Create a new collector instance
    pub fn new(config: Config, notifiers: Vec<Arc<dyn Notifier>>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            notifiers,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the collector when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build the unit sources for the configured source kind
    async fn sources(&self) -> Result<Vec<Box<dyn UnitSource>>> {
        let source = &self.config.source;
        let mut sources: Vec<Box<dyn UnitSource>> = Vec::new();

        match source.kind {
            SourceKind::Systemctl => {
                for (bus, enabled) in [(Bus::System, source.system), (Bus::User, source.user)] {
                    if enabled {
                        sources.push(Box::new(
                            SystemctlSource::new(bus, source.poll_interval)
                                .with_program(source.program.clone()),
                        ));
                    }
                }
            }
            SourceKind::Stdin => sources.push(Box::new(JsonLinesSource::stdin())),
            SourceKind::File => {
                let path = source
                    .path
                    .as_deref()
                    .ok_or_else(|| Error::validation("source.path is required for the file source"))?;
                sources.push(Box::new(JsonLinesSource::open(path).await?));
            }
        }

        Ok(sources)
    }

    /// Start every pipeline and wait until they finish, Ctrl+C is pressed
    /// or [`Collector::stop`] is called.
    ///
    /// Returns the error of the first required source that fails; the
    /// remaining pipelines are cancelled and drained first.
    pub async fn start(&self) -> Result<()> {
        info!("Starting unitalert collector...");

        let mut pipelines = JoinSet::new();
        let mut sources = JoinSet::new();

        for source in self.sources().await? {
            let label = source.name().to_string();
            let required = source.required();
            let pipeline = Pipeline::new(
                label.clone(),
                PipelineConfig::from(&self.config.agent),
                self.notifiers.clone(),
            )?;
            let (tx, rx) = Pipeline::channel();

            let cancel = self.cancel.child_token();
            pipelines.spawn({
                let cancel = cancel.clone();
                async move { pipeline.run(rx, cancel).await }
            });

            sources.spawn(async move {
                let result = source.run(tx, cancel).await;
                SourceExit {
                    label,
                    required,
                    result,
                }
            });
        }

        let mut failure = None;
        tokio::select! {
            _ = self.cancel.cancelled() => {
                info!("Shutdown signal received");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
            _ = wait_all(&mut pipelines) => {
                info!("All pipelines finished");
            }
            e = first_required_failure(&mut sources) => {
                failure = Some(e);
            }
        }

        // Cleanup
        self.cancel.cancel();
        wait_all(&mut pipelines).await;
        while let Some(joined) = sources.join_next().await {
            match joined {
                Ok(exit) => {
                    let fatal = exit.into_fatal();
                    if failure.is_none() {
                        failure = fatal;
                    }
                }
                Err(e) => warn!(error = %e, "Unit source task ended abnormally"),
            }
        }

        info!("Collector stopped");
        failure.map_or(Ok(()), Err)
    }

    /// Stop the collector
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// How a source task ended
struct SourceExit {
    label: String,
    required: bool,
    result: Result<()>,
}

impl SourceExit {
    /// Log the outcome and hand back the error if it must stop the collector
    fn into_fatal(self) -> Option<Error> {
        let e = self.result.err()?;
        if self.required {
            error!(source = %self.label, error = %e, "Required unit source failed");
            Some(e)
        } else {
            warn!(source = %self.label, error = %e, "Optional unit source failed, continuing without it");
            None
        }
    }
}

/// Resolves with the first fatal source error; pends forever otherwise
async fn first_required_failure(sources: &mut JoinSet<SourceExit>) -> Error {
    while let Some(joined) = sources.join_next().await {
        match joined {
            Ok(exit) => {
                if let Some(e) = exit.into_fatal() {
                    return e;
                }
            }
            Err(e) => warn!(error = %e, "Unit source task ended abnormally"),
        }
    }
    std::future::pending().await
}

async fn wait_all(pipelines: &mut JoinSet<PipelineStats>) {
    while let Some(joined) = pipelines.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Pipeline task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_source_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.jsonl");
        std::fs::write(&path, "{\"name\":\"a.service\",\"sub_state\":\"failed\"}\n").unwrap();

        let mut config = Config::default();
        config.source.kind = SourceKind::File;
        config.source.path = Some(path);

        // Returns once the file is exhausted and the pipeline drains
        let collector = Collector::new(config, vec![]).unwrap();
        collector.start().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start_returns() {
        let mut config = Config::default();
        config.source.kind = SourceKind::File;
        config.source.path = Some(std::path::PathBuf::from("/dev/null"));

        let collector = Collector::new(config, vec![]).unwrap();
        collector.stop();
        collector.start().await.unwrap();
    }

    fn systemctl_config(program: &str, system: bool, user: bool) -> Config {
        let mut config = Config::default();
        config.source.program = program.to_string();
        config.source.system = system;
        config.source.user = user;
        config
    }

    #[tokio::test]
    async fn test_system_bus_failure_is_fatal() {
        let config = systemctl_config("/nonexistent/systemctl", true, true);
        let collector = Collector::new(config, vec![]).unwrap();

        let err = collector.start().await.unwrap_err();
        assert!(matches!(err, Error::Source(_)));
    }

    #[tokio::test]
    async fn test_user_bus_failure_is_not_fatal() {
        let config = systemctl_config("/nonexistent/systemctl", false, true);
        let collector = Collector::new(config, vec![]).unwrap();

        collector.start().await.unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.agent.frequency = std::time::Duration::ZERO;
        assert!(Collector::new(config, vec![]).is_err());
    }
}
