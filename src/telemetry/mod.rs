pub mod monitor;
pub mod types;

pub use monitor::{CurrentMonitor, CurrentSource};
pub use types::*;

/// Capacity of the change notification channel.
pub const EVENT_CAPACITY: usize = 256;
