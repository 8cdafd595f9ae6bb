//! Data models for unitalert

mod unit;

pub use unit::*;
