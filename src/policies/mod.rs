//! Delay policies used by the error recovery system.
//!
//! ## Contents
//! - [`BackoffPolicy`] how waits grow with the attempt count (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization applied on top of the computed delay
//!
//! ## Wiring
//! ```text
//! RecoveryConfig { backoff: BackoffPolicy, .. }
//!      └─► recovery::strategy (EXPONENTIAL_BACKOFF) sleeps backoff.next(attempt)
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
