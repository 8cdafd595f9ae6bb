//! Batching pipeline for unit status records
//!
//! The pipeline receives unit records, keeps the ones the change detector
//! accepts in a per-unit pending map, and flushes that map to every notifier
//! on a fixed interval.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alerting::{BaselinePolicy, ChangeDetector, Filter};
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::models::UnitStatus;
use crate::notifier::{LogNotifier, Notifier};

/// Sending half of a pipeline's inbound channel
pub type UnitSender = mpsc::UnboundedSender<UnitStatus>;

/// Receiving half of a pipeline's inbound channel
pub type UnitReceiver = mpsc::UnboundedReceiver<UnitStatus>;

static EMPTY_UNIT: UnitStatus = UnitStatus {
    name: String::new(),
    load_state: String::new(),
    active_state: String::new(),
    sub_state: String::new(),
    path: String::new(),
};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Interval between flushes
    pub frequency: Duration,
    /// Unit names that never alert
    pub ignore: Vec<String>,
    /// Which records update the comparison baseline
    pub baseline: BaselinePolicy,
    /// Flush pending units once more when the pipeline stops
    pub flush_on_shutdown: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for PipelineConfig {
    fn from(agent: &AgentConfig) -> Self {
        Self {
            frequency: agent.frequency,
            ignore: agent.ignore.clone(),
            baseline: agent.baseline,
            flush_on_shutdown: agent.flush_on_shutdown,
        }
    }
}

/// Per-unit dedup memory and the pending batch of one pipeline
#[derive(Debug)]
pub struct BatchState {
    detector: ChangeDetector,
    baseline: BaselinePolicy,
    /// Last record compared against, per unit. Lives as long as the pipeline.
    last_seen: HashMap<String, UnitStatus>,
    /// Accepted changes since the last flush
    pending: HashMap<String, UnitStatus>,
}

impl BatchState {
    /// Create empty state
    pub fn new(detector: ChangeDetector, baseline: BaselinePolicy) -> Self {
        Self {
            detector,
            baseline,
            last_seen: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Run one record through the detector. Returns true if it was accepted
    /// into the pending batch, replacing any earlier entry for the unit.
    pub fn observe(&mut self, unit: UnitStatus) -> bool {
        let previous = self.last_seen.get(&unit.name).unwrap_or(&EMPTY_UNIT);
        let changed = self.detector.is_changed(previous, &unit);
        let differs = *previous != unit;

        if changed {
            self.last_seen.insert(unit.name.clone(), unit.clone());
            self.pending.insert(unit.name.clone(), unit);
        } else if differs && self.baseline == BaselinePolicy::EveryRecord {
            self.last_seen.insert(unit.name.clone(), unit);
        }

        changed
    }

    /// Take the pending batch, leaving an empty one. `None` when idle.
    pub fn take_batch(&mut self) -> Option<Vec<UnitStatus>> {
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending).into_values().collect())
    }

    /// True when no changes are pending
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of units waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Last recorded state of a unit
    pub fn last_seen(&self, name: &str) -> Option<&UnitStatus> {
        self.last_seen.get(name)
    }
}

/// Counters for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Records received
    pub observed: u64,
    /// Records accepted into a batch
    pub accepted: u64,
    /// Batches delivered to the notifiers
    pub batches: u64,
    /// Units delivered across all batches
    pub flushed_units: u64,
}

/// Batching pipeline for one unit source
pub struct Pipeline {
    label: String,
    config: PipelineConfig,
    detector: ChangeDetector,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl Pipeline {
    /// Create a new pipeline.
    ///
    /// Fails if the flush interval is zero. With no notifiers the log
    /// notifier is used.
    pub fn new(
        label: impl Into<String>,
        config: PipelineConfig,
        mut notifiers: Vec<Arc<dyn Notifier>>,
    ) -> Result<Self> {
        if config.frequency.is_zero() {
            return Err(Error::validation("pipeline flush interval must be greater than zero"));
        }

        if notifiers.is_empty() {
            notifiers.push(Arc::new(LogNotifier::new()));
        }

        let detector = ChangeDetector::new(Filter::alert_worthy(config.ignore.iter().cloned()));

        Ok(Self {
            label: label.into(),
            config,
            detector,
            notifiers,
        })
    }

    /// Create an inbound channel. Any number of producers may clone the sender.
    pub fn channel() -> (UnitSender, UnitReceiver) {
        mpsc::unbounded_channel()
    }

    /// Label used in logs and metrics
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the pipeline until `units` closes or `cancel` fires
    pub async fn run(&self, mut units: UnitReceiver, cancel: CancellationToken) -> PipelineStats {
        let frequency = self.config.frequency;
        let mut state = BatchState::new(self.detector.clone(), self.config.baseline);
        let mut stats = PipelineStats::default();

        let mut ticker = interval_at(Instant::now() + frequency, frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            pipeline = %self.label,
            frequency = ?frequency,
            notifiers = self.notifiers.len(),
            "Pipeline started"
        );

        loop {
            // Polled in order: a due tick wins over queued records
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(pipeline = %self.label, "Pipeline cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    // Records queued before the tick belong to this batch
                    while let Ok(unit) = units.try_recv() {
                        self.observe(&mut state, &mut stats, unit);
                    }
                    self.flush(&mut state, &mut stats).await;
                }

                received = units.recv() => {
                    match received {
                        Some(unit) => self.observe(&mut state, &mut stats, unit),
                        None => {
                            info!(pipeline = %self.label, "Unit source closed");
                            break;
                        }
                    }
                }
            }
        }

        if self.config.flush_on_shutdown {
            self.flush(&mut state, &mut stats).await;
        } else if !state.is_idle() {
            warn!(
                pipeline = %self.label,
                pending = state.pending_len(),
                "Dropping pending units on shutdown"
            );
        }

        info!(
            pipeline = %self.label,
            observed = stats.observed,
            accepted = stats.accepted,
            batches = stats.batches,
            "Pipeline stopped"
        );
        stats
    }

    fn observe(&self, state: &mut BatchState, stats: &mut PipelineStats, unit: UnitStatus) {
        stats.observed += 1;
        let name = unit.name.clone();

        if state.observe(unit) {
            stats.accepted += 1;
            metrics::counter!("unitalert_units_accepted_total", "pipeline" => self.label.clone())
                .increment(1);
            debug!(pipeline = %self.label, unit = %name, "Unit change accepted");
        } else {
            metrics::counter!("unitalert_units_ignored_total", "pipeline" => self.label.clone())
                .increment(1);
        }
    }

    /// Deliver the pending batch to every notifier, one after another
    async fn flush(&self, state: &mut BatchState, stats: &mut PipelineStats) {
        let Some(batch) = state.take_batch() else {
            return;
        };

        debug!(pipeline = %self.label, units = batch.len(), "Flushing batch");

        for notifier in &self.notifiers {
            let delivery = AssertUnwindSafe(notifier.alert(&batch)).catch_unwind().await;
            if delivery.is_err() {
                error!(
                    pipeline = %self.label,
                    notifier = notifier.name(),
                    "Notifier panicked while delivering batch"
                );
            }
        }

        stats.batches += 1;
        stats.flushed_units += batch.len() as u64;
        metrics::counter!("unitalert_batches_flushed_total", "pipeline" => self.label.clone())
            .increment(1);
        metrics::counter!("unitalert_units_flushed_total", "pipeline" => self.label.clone())
            .increment(batch.len() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn unit(name: &str, sub_state: &str) -> UnitStatus {
        UnitStatus::new(name, "loaded", "active", sub_state)
    }

    fn state(baseline: BaselinePolicy) -> BatchState {
        BatchState::new(ChangeDetector::default(), baseline)
    }

    #[test]
    fn test_duplicate_is_dropped() {
        let mut state = state(BaselinePolicy::default());
        assert!(state.observe(unit("a", "failed")));
        assert!(!state.observe(unit("a", "failed")));
        assert_eq!(state.take_batch().unwrap(), vec![unit("a", "failed")]);
    }

    #[test]
    fn test_later_update_overwrites_pending() {
        let mut state = state(BaselinePolicy::EveryRecord);
        assert!(state.observe(unit("a", "failed")));
        assert!(state.observe(unit("a", "auto-restart")));
        assert!(state.observe(unit("a", "failed")));
        assert_eq!(state.pending_len(), 1);
        assert_eq!(state.take_batch().unwrap(), vec![unit("a", "failed")]);
    }

    #[test]
    fn test_take_batch_resets_to_idle() {
        let mut state = state(BaselinePolicy::EveryRecord);
        assert!(state.take_batch().is_none());

        state.observe(unit("a", "failed"));
        assert!(!state.is_idle());
        assert!(state.take_batch().is_some());
        assert!(state.is_idle());
        assert!(state.take_batch().is_none());

        // Dedup memory outlives the batch
        assert!(!state.observe(unit("a", "failed")));
    }

    #[test]
    fn test_every_record_baseline_realerts_after_recovery() {
        let mut state = state(BaselinePolicy::EveryRecord);
        assert!(state.observe(unit("a", "failed")));
        assert!(!state.observe(unit("a", "running")));
        assert_eq!(state.last_seen("a"), Some(&unit("a", "running")));
        assert!(state.observe(unit("a", "failed")));
    }

    #[test]
    fn test_accepted_only_baseline_keeps_stale_record() {
        let mut state = state(BaselinePolicy::AcceptedOnly);
        assert!(state.observe(unit("a", "failed")));
        assert!(!state.observe(unit("a", "running")));
        assert_eq!(state.last_seen("a"), Some(&unit("a", "failed")));
        // Compared against the stale "failed" record
        assert!(!state.observe(unit("a", "failed")));
    }

    #[test]
    fn test_rejected_first_observation_not_pending() {
        let mut state = state(BaselinePolicy::EveryRecord);
        assert!(!state.observe(unit("b", "running")));
        assert!(state.is_idle());
    }

    #[test]
    fn test_zero_frequency_rejected() {
        let config = PipelineConfig {
            frequency: Duration::ZERO,
            ..PipelineConfig::default()
        };
        assert!(Pipeline::new("test", config, vec![]).is_err());
    }

    #[test]
    fn test_empty_notifiers_fall_back_to_log() {
        let pipeline = Pipeline::new("test", PipelineConfig::default(), vec![]).unwrap();
        assert_eq!(pipeline.notifiers.len(), 1);
        assert_eq!(pipeline.notifiers[0].name(), "log");
    }

    struct PanickingNotifier;

    #[async_trait]
    impl Notifier for PanickingNotifier {
        fn name(&self) -> &str {
            "panics"
        }

        async fn alert(&self, _units: &[UnitStatus]) {
            panic!("sink bug");
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        fn name(&self) -> &str {
            "counting"
        }

        async fn alert(&self, _units: &[UnitStatus]) {
            *self.calls.lock() += 1;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_notifier_does_not_stop_delivery() {
        let counting = Arc::new(CountingNotifier::default());
        let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(PanickingNotifier), counting.clone()];
        let pipeline = Pipeline::new("test", PipelineConfig::default(), notifiers).unwrap();

        let (tx, rx) = Pipeline::channel();
        tx.send(unit("a", "failed")).unwrap();
        drop(tx);

        let stats = pipeline.run(rx, CancellationToken::new()).await;
        assert_eq!(stats.batches, 1);
        assert_eq!(*counting.calls.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_pipeline() {
        let pipeline = Pipeline::new("test", PipelineConfig::default(), vec![]).unwrap();
        let (_tx, rx) = Pipeline::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = pipeline.run(rx, cancel).await;
        assert_eq!(stats, PipelineStats::default());
    }
}
