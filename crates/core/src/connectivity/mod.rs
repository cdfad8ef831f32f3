//! Network reachability tracking.

mod connectivity_monitor;

pub use connectivity_monitor::*;
