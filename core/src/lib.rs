//! imgpack Core - Foundational Types
//!
//! Errors, configuration, the shared [`Throttle`] and the generic
//! [`WorkQueue`] used by the packaging runtime.

pub mod config;
pub mod error;
pub mod queue;
pub mod throttle;

pub use config::PackConfig;
pub use error::{ItemFailure, PackError, Result};
pub use queue::{QueueOutcome, WorkQueue};
pub use throttle::{Throttle, ThrottlePermit};

/// imgpack version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
