//! Coordination primitives for the periodic cycles.

pub mod cycle_lock;
pub mod shutdown;

pub use cycle_lock::CycleLock;
pub use shutdown::{install_signal_handlers, Shutdown};
