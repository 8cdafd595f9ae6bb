//! Polling source backed by `systemctl list-units`

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::UnitSender;
use crate::error::{Error, Result};
use crate::models::UnitStatus;

use super::{Bus, UnitSource};

const LIST_UNITS_ARGS: &[&str] = &[
    "list-units",
    "--all",
    "--plain",
    "--no-legend",
    "--no-pager",
    "--full",
];

/// Polls the service manager and emits every unit on every poll.
///
/// Repeated identical snapshots are expected; the pipeline's change
/// detector drops them.
pub struct SystemctlSource {
    bus: Bus,
    poll_interval: Duration,
    program: String,
}

impl SystemctlSource {
    /// Create a source for one manager instance
    pub fn new(bus: Bus, poll_interval: Duration) -> Self {
        Self {
            bus,
            poll_interval,
            program: "systemctl".to_string(),
        }
    }

    /// Use a different executable than `systemctl`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn poll(&self) -> Result<Vec<UnitStatus>> {
        let output = Command::new(&self.program)
            .args(self.bus.systemctl_args())
            .args(LIST_UNITS_ARGS)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::unit_source(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(Error::unit_source(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_list_units(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl UnitSource for SystemctlSource {
    fn name(&self) -> &str {
        self.bus.label()
    }

    // The user manager is absent on many hosts
    fn required(&self) -> bool {
        self.bus == Bus::System
    }

    async fn run(self: Box<Self>, tx: UnitSender, cancel: CancellationToken) -> Result<()> {
        // The first poll doubles as the connection check
        let initial = self.poll().await?;
        info!(bus = %self.bus, units = initial.len(), "Watching units");
        let mut pending = Some(initial);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            let units = match pending.take() {
                Some(units) => units,
                None => {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = cancel.cancelled() => break,
                    }
                    match self.poll().await {
                        Ok(units) => units,
                        Err(e) => {
                            warn!(bus = %self.bus, error = %e, "Failed to list units");
                            continue;
                        }
                    }
                }
            };

            debug!(bus = %self.bus, units = units.len(), "Polled units");
            for unit in units {
                if tx.send(unit).is_err() {
                    debug!(bus = %self.bus, "Pipeline gone, stopping source");
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

/// Parse `systemctl list-units --plain --no-legend --full` output.
///
/// Columns are UNIT LOAD ACTIVE SUB DESCRIPTION; the description is
/// dropped. Leading status markers such as `●` are stripped and lines with
/// fewer than four columns are skipped.
pub fn parse_list_units(output: &str) -> Vec<UnitStatus> {
    output
        .lines()
        .filter_map(|line| {
            let mut columns = line
                .split_whitespace()
                .skip_while(|column| matches!(*column, "●" | "*" | "○"));

            let name = columns.next()?;
            let load_state = columns.next()?;
            let active_state = columns.next()?;
            let sub_state = columns.next()?;

            Some(UnitStatus::new(name, load_state, active_state, sub_state))
        })
        .collect()
}
