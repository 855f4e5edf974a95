//! Probe execution: one HTTP check in, one classified result out.
//!
//! The [`Prober`] owns the process-wide HTTP client (shared connection
//! pool) and is safe to call concurrently. It never fails: every transport
//! error, bad credential, or unexpected status becomes a typed
//! [`CheckResult`](httpmon_common::types::CheckResult).

pub mod classify;
pub mod prober;


pub use classify::classify;
pub use prober::Prober;
