//! Checkpoint and resume of units of work across bounded executions
//!
//! A unit that runs out of budget serializes its engine progress into the
//! checkpoint cache and queues exactly one `Resume` message for it. The
//! resuming worker reattaches its own budget and continues from the saved
//! partition, so the final result is the same however often a unit was
//! interrupted.

mod checkpoint;
mod manager;


pub use checkpoint::{checkpoint_key, Checkpoint, CHECKPOINT_VERSION};
pub use manager::{ContinuationConfig, ContinuationManager, UnitOutcome, DEFAULT_CHECKPOINT_TTL};
