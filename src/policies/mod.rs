//! Retry policies for store calls.
//!
//! ## Contents
//! - [`RetryPolicy`] how many times a store call is issued
//! - [`BackoffPolicy`] how delays between attempts evolve (first / factor / max + jitter)
//! - [`JitterPolicy`] randomization strategy to avoid synchronized retries
//!
//! ## Quick wiring
//! ```text
//! Config { finalize_retry, append_retry, subscribe_retry, publish_retry, connect_retry }
//!      └─► RetryPolicy::run(bus, run_id, op, call)
//!           └─► backoff.next(attempt) between failed attempts
//! ```

mod backoff;
mod jitter;
mod retry;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use retry::RetryPolicy;
