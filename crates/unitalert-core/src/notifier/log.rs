//! Log notifier, the fallback sink

use async_trait::async_trait;
use tracing::warn;

use crate::models::UnitStatus;

use super::Notifier;

/// Writes one log event per unit
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    /// Create a new log notifier
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn alert(&self, units: &[UnitStatus]) {
        for unit in units {
            warn!(
                unit = %unit.name,
                load_state = %unit.load_state,
                active_state = %unit.active_state,
                sub_state = %unit.sub_state,
                path = %unit.path,
                "Unit alert"
            );
        }
    }
}
