//! Retry loop: run a closure until success or policy says stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use super::classify;
use super::error::RequestError;
use super::policy::{RetryDecision, RetryPolicy};

/// Runs `f` until it succeeds, the policy says to stop, or `stop` is raised.
///
/// Sleeps `policy.initial_delay()` before the first attempt and the table
/// delay before each retry. `stop` is checked before every retry so a failed
/// upload issues no further requests; the last error is returned in that case.
pub fn run_with_retry<T, F>(
    policy: &RetryPolicy,
    what: &str,
    stop: &AtomicBool,
    mut f: F,
) -> Result<T, RequestError>
where
    F: FnMut() -> Result<T, RequestError>,
{
    let initial = policy.initial_delay();
    if !initial.is_zero() {
        thread::sleep(initial);
    }
    let mut attempt = 1u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = classify::classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => {
                        tracing::debug!(what, attempt, error = %e, "giving up");
                        return Err(e);
                    }
                    RetryDecision::RetryAfter(d) => {
                        if stop.load(Ordering::Relaxed) {
                            return Err(e);
                        }
                        tracing::warn!(
                            what,
                            attempt,
                            delay_ms = d.as_millis() as u64,
                            error = %e,
                            "request failed, retrying"
                        );
                        if !d.is_zero() {
                            thread::sleep(d);
                        }
                        if stop.load(Ordering::Relaxed) {
                            return Err(e);
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }
}
