//! Shared utilities.

pub mod bootstrap;
pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};
