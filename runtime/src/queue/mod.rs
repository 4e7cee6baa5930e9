//! Per-reference work queues.
//!
//! Each queue fans independent items out over a throttled
//! [`WorkQueue`](imgpack_core::queue::WorkQueue) and reports a
//! [`QueueOutcome`](imgpack_core::queue::QueueOutcome) keyed by input.

mod build;
mod import;
mod resolve;

pub use build::{BuildQueue, BuildRequest, Builder};
pub use import::{alias_map, ImportQueue};
pub use resolve::ResolveQueue;
