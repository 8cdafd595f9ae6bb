//! Unit filters
//!
//! Filters are pure predicates over a [`UnitStatus`]. They only ever look at
//! the new state of a unit and compose with [`Filter::any`] / [`Filter::all`].

use std::collections::HashSet;

use crate::models::{UnitStatus, SUB_STATE_AUTO_RESTART, SUB_STATE_FAILED};

/// A composable predicate over a unit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Sub state equals the given value
    SubState(String),
    /// Unit name is not in the ignore set (case-sensitive)
    NotIgnored(HashSet<String>),
    /// Unit name equals the given value, ignoring case
    ByName(String),
    /// True if any inner filter matches; an empty list never matches
    Or(Vec<Filter>),
    /// True if every inner filter matches; an empty list always matches
    And(Vec<Filter>),
}

impl Filter {
    /// Matches units whose sub state is "failed"
    pub fn failed() -> Self {
        Self::SubState(SUB_STATE_FAILED.to_string())
    }

    /// Matches units whose sub state is "auto-restart"
    pub fn auto_restart() -> Self {
        Self::SubState(SUB_STATE_AUTO_RESTART.to_string())
    }

    /// Matches units whose name is absent from `names`
    pub fn not_ignored<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::NotIgnored(names.into_iter().map(Into::into).collect())
    }

    /// Matches a single unit by name, ignoring case
    pub fn by_name(name: impl Into<String>) -> Self {
        Self::ByName(name.into())
    }

    /// Logical OR over `filters`
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    /// Logical AND over `filters`
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    /// The default alert-worthiness predicate: not ignored, and either
    /// auto-restarting or failed.
    pub fn alert_worthy<I, S>(ignore: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::all([
            Self::not_ignored(ignore),
            Self::any([Self::auto_restart(), Self::failed()]),
        ])
    }

    /// Evaluate the filter against a unit
    pub fn matches(&self, unit: &UnitStatus) -> bool {
        match self {
            Filter::SubState(sub_state) => unit.sub_state == *sub_state,
            Filter::NotIgnored(names) => !names.contains(&unit.name),
            Filter::ByName(name) => unit.name.to_lowercase() == name.to_lowercase(),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(unit)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(unit)),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::alert_worthy(std::iter::empty::<String>())
    }
}
