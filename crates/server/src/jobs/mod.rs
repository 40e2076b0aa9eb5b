// crates/server/src/jobs/mod.rs
//! The background worker pool: atomic claiming, per-kind parallelism caps,
//! and the cancellation protocol.

mod cancel;
mod worker;

pub use cancel::CancelFlag;
pub use worker::{max_workers, parallel_limit, run_worker};
