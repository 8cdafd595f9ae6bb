//! Desktop notifications through the session notification daemon

use std::collections::HashMap;

use async_trait::async_trait;
use notify_rust::Notification;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::UnitStatus;

use super::Notifier;

/// Native notifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Application name shown by the notification daemon
    pub app_name: String,
    /// Icon name from the freedesktop icon theme
    pub icon: String,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            app_name: "Systemd Alert".to_string(),
            icon: "dialog-warning".to_string(),
        }
    }
}

/// Pops one desktop notification per unit.
///
/// The notification id is remembered per unit so a later alert for the
/// same unit replaces the earlier popup instead of stacking.
pub struct NativeNotifier {
    config: NativeConfig,
    current: Mutex<HashMap<String, u32>>,
}

impl NativeNotifier {
    /// Create a new native notifier
    pub fn new(config: NativeConfig) -> Self {
        Self {
            config,
            current: Mutex::new(HashMap::new()),
        }
    }

    fn summary(unit: &UnitStatus) -> String {
        format!("{} {}", unit.name, unit.state_summary())
    }
}

#[async_trait]
impl Notifier for NativeNotifier {
    fn name(&self) -> &str {
        "native"
    }

    async fn alert(&self, units: &[UnitStatus]) {
        for unit in units {
            let replaces = self.current.lock().get(&unit.name).copied();
            let app_name = self.config.app_name.clone();
            let icon = self.config.icon.clone();
            let summary = Self::summary(unit);

            let shown = tokio::task::spawn_blocking(move || {
                let mut notification = Notification::new();
                notification.appname(&app_name).summary(&summary).icon(&icon);
                if let Some(id) = replaces {
                    notification.id(id);
                }
                notification.show().map(|handle| handle.id())
            })
            .await;

            match shown {
                Ok(Ok(id)) => {
                    self.current.lock().insert(unit.name.clone(), id);
                }
                Ok(Err(e)) => warn!(unit = %unit.name, error = %e, "Desktop notification failed"),
                Err(e) => warn!(unit = %unit.name, error = %e, "Desktop notification task failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let unit = UnitStatus::new("a.service", "loaded", "activating", "auto-restart");
        assert_eq!(NativeNotifier::summary(&unit), "a.service activating - auto-restart");
    }

    #[test]
    fn test_config_defaults() {
        let config: NativeConfig = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(config.app_name, "Systemd Alert");
    }
}
