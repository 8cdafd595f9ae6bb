//! Unit status data model

use std::fmt::Write;

use serde::{Deserialize, Serialize};

/// Object path prefix the service manager exposes units under
pub const UNIT_PATH_PREFIX: &str = "/org/freedesktop/systemd1/unit/";

/// Sub state of a unit that has failed
pub const SUB_STATE_FAILED: &str = "failed";

/// Sub state of a unit waiting to be restarted
pub const SUB_STATE_AUTO_RESTART: &str = "auto-restart";

/// Snapshot of one unit's state as reported by the service manager.
///
/// Records are never mutated once built; a change is a new record that
/// replaces the stored one. `UnitStatus::default()` is the empty sentinel
/// that every real record differs from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitStatus {
    /// Primary unit name (e.g. "nginx.service")
    pub name: String,

    /// Whether the unit file has been loaded
    #[serde(default)]
    pub load_state: String,

    /// Whether the unit is currently started
    #[serde(default)]
    pub active_state: String,

    /// Fine-grained state specific to the unit type
    #[serde(default)]
    pub sub_state: String,

    /// Object path of the unit on the bus
    #[serde(default)]
    pub path: String,
}

impl UnitStatus {
    /// Create a unit status, deriving the object path from the name
    pub fn new(
        name: impl Into<String>,
        load_state: impl Into<String>,
        active_state: impl Into<String>,
        sub_state: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let path = unit_object_path(&name);

        Self {
            name,
            load_state: load_state.into(),
            active_state: active_state.into(),
            sub_state: sub_state.into(),
            path,
        }
    }

    /// Whether the unit's sub state is "failed"
    pub fn is_failed(&self) -> bool {
        self.sub_state == SUB_STATE_FAILED
    }

    /// Whether the unit's sub state is "auto-restart"
    pub fn is_auto_restart(&self) -> bool {
        self.sub_state == SUB_STATE_AUTO_RESTART
    }

    /// Short human-readable state, "<active> - <sub>"
    pub fn state_summary(&self) -> String {
        format!("{} - {}", self.active_state, self.sub_state)
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, {}, {})",
            self.name, self.load_state, self.active_state, self.sub_state
        )
    }
}

/// Object path the service manager uses for a unit name
pub fn unit_object_path(name: &str) -> String {
    format!("{}{}", UNIT_PATH_PREFIX, bus_path_escape(name))
}

/// Escape a string for use as one element of a bus object path.
///
/// Anything outside `[A-Za-z0-9]`, and a leading digit, becomes `_xx`.
pub fn bus_path_escape(element: &str) -> String {
    if element.is_empty() {
        return "_".to_string();
    }

    let mut escaped = String::with_capacity(element.len());
    for (i, b) in element.bytes().enumerate() {
        let needs_escape = !b.is_ascii_alphanumeric() || (i == 0 && b.is_ascii_digit());
        if needs_escape {
            let _ = write!(escaped, "_{b:02x}");
        } else {
            escaped.push(b as char);
        }
    }
    escaped
}
