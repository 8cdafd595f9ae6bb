//! Alerting rules for unitalert
//!
//! Decides which unit transitions are alert-worthy.

mod detector;
mod filter;

pub use detector::{BaselinePolicy, ChangeDetector};
pub use filter::Filter;
