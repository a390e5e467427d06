//! Service layer
//!
//! [`LockoutService`] is the engine each limiter instance runs;
//! [`CleanupSweeper`] evicts its stale records in the background.

pub mod lockout;
pub mod sweeper;

pub use lockout::LockoutService;
pub use sweeper::{CleanupSweeper, SweeperHandle};
