//! Utility functions and helpers
//!
//! Atomic file writes, clocks and timestamp helpers.

pub mod atomic;
pub mod time;

pub use atomic::{atomic_write_with, cleanup_temp_files, set_modified};
pub use time::{days_before, parse_instant, rotation_stamp, Clock, ManualClock, SystemClock};
