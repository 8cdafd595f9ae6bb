//! End-to-end batching behaviour with a recording notifier and paused time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use unitalert::collector::{Pipeline, PipelineConfig, PipelineStats, UnitSender};
use unitalert::models::UnitStatus;
use unitalert::notifier::Notifier;

const INTERVAL: Duration = Duration::from_millis(100);

/// Batch delivered at an offset from the pipeline start
type Delivery = (Duration, Vec<UnitStatus>);

struct Recorder {
    start: Instant,
    delay: Duration,
    deliveries: Mutex<Vec<Delivery>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Each delivery takes `delay` to return
    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            delay,
            deliveries: Mutex::new(Vec::new()),
        })
    }

    fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    fn batches(&self) -> Vec<Vec<UnitStatus>> {
        self.deliveries().into_iter().map(|(_, batch)| batch).collect()
    }
}

#[async_trait]
impl Notifier for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn alert(&self, units: &[UnitStatus]) {
        self.deliveries
            .lock()
            .push((self.start.elapsed(), units.to_vec()));
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
    }
}

struct Harness {
    tx: UnitSender,
    cancel: CancellationToken,
    handle: JoinHandle<PipelineStats>,
    recorder: Arc<Recorder>,
}

impl Harness {
    fn start(config: PipelineConfig) -> Self {
        Self::with_recorder(config, Recorder::new())
    }

    fn with_recorder(config: PipelineConfig, recorder: Arc<Recorder>) -> Self {
        let notifiers: Vec<Arc<dyn Notifier>> = vec![recorder.clone()];
        let pipeline = Pipeline::new("test", config, notifiers).unwrap();
        let (tx, rx) = Pipeline::channel();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { pipeline.run(rx, cancel).await }
        });

        Self {
            tx,
            cancel,
            handle,
            recorder,
        }
    }

    fn with_ignore(ignore: &[&str]) -> Self {
        Self::start(PipelineConfig {
            frequency: INTERVAL,
            ignore: ignore.iter().map(ToString::to_string).collect(),
            ..PipelineConfig::default()
        })
    }

    fn send(&self, name: &str, active_state: &str, sub_state: &str) {
        self.tx
            .send(UnitStatus::new(name, "loaded", active_state, sub_state))
            .unwrap();
    }

    async fn stop(self) -> PipelineStats {
        self.cancel.cancel();
        tokio_test::assert_ok!(self.handle.await)
    }
}

fn names(batch: &[UnitStatus]) -> HashSet<&str> {
    batch.iter().map(|unit| unit.name.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_and_filtered_records_within_one_interval() {
    let harness = Harness::with_ignore(&[]);
    let start = Instant::now();

    harness.send("a", "failed", "failed");
    sleep_until(start + Duration::from_millis(10)).await;
    harness.send("a", "failed", "failed");
    sleep_until(start + Duration::from_millis(20)).await;
    harness.send("b", "active", "running");

    sleep_until(start + Duration::from_millis(150)).await;

    let deliveries = harness.recorder.deliveries();
    assert_eq!(deliveries.len(), 1);
    let (at, batch) = &deliveries[0];
    assert!(*at >= INTERVAL && *at < INTERVAL + Duration::from_millis(10), "flushed at {at:?}");
    assert_eq!(batch, &vec![UnitStatus::new("a", "loaded", "failed", "failed")]);

    let stats = harness.stop().await;
    assert_eq!(stats.observed, 3);
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.batches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_record_queued_at_tick_joins_that_batch() {
    // The first delivery runs until t=250, past the t=200 tick
    let recorder = Recorder::with_delay(Duration::from_millis(150));
    let harness = Harness::with_recorder(
        PipelineConfig {
            frequency: INTERVAL,
            ..PipelineConfig::default()
        },
        recorder,
    );
    let start = Instant::now();

    harness.send("a", "failed", "failed");
    sleep_until(start + Duration::from_millis(150)).await;
    // Queued while the pipeline is busy; ready together with the late tick
    harness.send("b", "failed", "failed");
    sleep_until(start + Duration::from_millis(400)).await;

    let deliveries = harness.recorder.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].0, INTERVAL);
    assert_eq!(deliveries[1].0, Duration::from_millis(250));
    assert_eq!(deliveries[1].1, vec![UnitStatus::new("b", "loaded", "failed", "failed")]);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_flapping_unit_flushes_last_state_only() {
    let harness = Harness::with_ignore(&[]);

    harness.send("a", "failed", "failed");
    harness.send("a", "activating", "auto-restart");
    harness.send("a", "failed", "failed");
    sleep(INTERVAL + INTERVAL / 2).await;

    assert_eq!(
        harness.recorder.batches(),
        vec![vec![UnitStatus::new("a", "loaded", "failed", "failed")]]
    );
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_ignored_units_never_flush() {
    let harness = Harness::with_ignore(&["noisy.service"]);

    for sub_state in ["failed", "auto-restart", "failed", "auto-restart"] {
        harness.send("noisy.service", "failed", sub_state);
        harness.send("real.service", "failed", sub_state);
        sleep(INTERVAL).await;
    }
    sleep(INTERVAL).await;

    let batches = harness.recorder.batches();
    assert!(!batches.is_empty());
    for batch in &batches {
        assert_eq!(names(batch), HashSet::from(["real.service"]));
    }
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_non_failure_transitions_never_flush() {
    let harness = Harness::with_ignore(&[]);

    for (active_state, sub_state) in [
        ("active", "running"),
        ("inactive", "dead"),
        ("active", "exited"),
        ("activating", "start"),
    ] {
        harness.send("a", active_state, sub_state);
        sleep(INTERVAL / 4).await;
    }
    sleep(INTERVAL * 3).await;

    assert!(harness.recorder.deliveries().is_empty());
    let stats = harness.stop().await;
    assert_eq!(stats.accepted, 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_ticks_do_not_call_notifiers() {
    let harness = Harness::with_ignore(&[]);

    harness.send("a", "failed", "failed");
    sleep(INTERVAL * 5 + INTERVAL / 2).await;

    // One batch from the first tick, nothing from the four idle ones
    assert_eq!(harness.recorder.deliveries().len(), 1);
    let stats = harness.stop().await;
    assert_eq!(stats.batches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_two_units_share_one_batch() {
    let harness = Harness::with_ignore(&[]);

    harness.send("b.service", "failed", "failed");
    sleep(INTERVAL / 3).await;
    harness.send("a.service", "activating", "auto-restart");
    sleep(INTERVAL).await;

    let batches = harness.recorder.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(names(&batches[0]), HashSet::from(["a.service", "b.service"]));
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_recovered_unit_alerts_again() {
    let harness = Harness::with_ignore(&[]);

    harness.send("a", "failed", "failed");
    sleep(INTERVAL + INTERVAL / 2).await;
    harness.send("a", "active", "running");
    sleep(INTERVAL).await;
    harness.send("a", "failed", "failed");
    sleep(INTERVAL).await;

    assert_eq!(harness.recorder.batches().len(), 2);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_pending_batch_flushed_on_shutdown() {
    let harness = Harness::with_ignore(&[]);

    harness.send("a", "failed", "failed");
    sleep(INTERVAL / 2).await;
    let recorder = harness.recorder.clone();
    let stats = harness.stop().await;

    assert_eq!(recorder.batches().len(), 1);
    assert_eq!(stats.flushed_units, 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_batch_dropped_when_shutdown_flush_disabled() {
    let harness = Harness::start(PipelineConfig {
        frequency: INTERVAL,
        flush_on_shutdown: false,
        ..PipelineConfig::default()
    });

    harness.send("a", "failed", "failed");
    sleep(INTERVAL / 2).await;
    let recorder = harness.recorder.clone();
    let stats = harness.stop().await;

    assert!(recorder.deliveries().is_empty());
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.batches, 0);
}

#[tokio::test(start_paused = true)]
async fn test_closed_source_ends_pipeline() {
    let harness = Harness::with_ignore(&[]);
    harness.send("a", "failed", "failed");

    let Harness {
        tx,
        handle,
        recorder,
        ..
    } = harness;
    drop(tx);

    let stats = tokio_test::assert_ok!(handle.await);
    assert_eq!(stats.batches, 1);
    assert_eq!(recorder.batches().len(), 1);
}
