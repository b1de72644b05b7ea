//! Shared numeric utilities.

pub mod ols;
pub mod stats;
