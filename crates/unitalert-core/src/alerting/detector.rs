//! Change detection between successive unit snapshots

use serde::{Deserialize, Serialize};

use crate::models::UnitStatus;

use super::filter::Filter;

/// Which records become the comparison baseline for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BaselinePolicy {
    /// Every observed record replaces the baseline, matching or not
    #[default]
    EveryRecord,
    /// Only records that were accepted as changes replace the baseline
    AcceptedOnly,
}

/// Decides whether a transition is worth alerting on
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    filter: Filter,
}

impl ChangeDetector {
    /// Create a detector around an alert-worthiness filter
    pub fn new(filter: Filter) -> Self {
        Self { filter }
    }

    /// The filter applied to new states
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// True iff `new` passes the filter and differs from `old`.
    ///
    /// A unit seen for the first time is compared against
    /// `UnitStatus::default()`.
    pub fn is_changed(&self, old: &UnitStatus, new: &UnitStatus) -> bool {
        self.filter.matches(new) && old != new
    }
}
