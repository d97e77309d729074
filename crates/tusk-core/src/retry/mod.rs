//! Retry and backoff policy.
//!
//! Every request the upload controller issues (offset probe, session creation,
//! each chunk) runs through the same fixed delay table. Errors are classified
//! first so protocol violations fail at once instead of burning the schedule.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify, classify_http_status, classify_transport_error};
pub use error::RequestError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy, DEFAULT_RETRY_DELAYS_MS};
pub use run::run_with_retry;
