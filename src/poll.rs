//! Bounded-wait primitive underlying every locator and interaction call.
//!
//! A check is invoked at a fixed short interval until it yields a value or
//! the wall-clock timeout elapses. There is no maximum retry count.

use std::time::Duration;

use tokio::time::Instant;

use crate::utils::error::{AppError, Result};

/// Interval between check invocations.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default bound for interaction and locator calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shorter bound for "does X exist" probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Repeatedly invokes `check` until it returns a value or `timeout` elapses.
///
/// `Ok(Some(v))` ends polling immediately. `Ok(None)` keeps polling. An `Err`
/// is remembered and polling continues; when the timeout expires the last
/// remembered error is raised, or a [`AppError::Timeout`] carrying
/// `timeout_message` when no check ever failed.
pub async fn poll<T, F>(mut check: F, timeout: Duration, timeout_message: &str) -> Result<T>
where
    F: FnMut() -> Result<Option<T>>,
{
    let started = Instant::now();
    let mut last_error: Option<AppError> = None;

    loop {
        match check() {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(err) => last_error = Some(err),
        }

        if started.elapsed() > timeout {
            return Err(last_error.unwrap_or_else(|| AppError::Timeout {
                message: timeout_message.to_string(),
            }));
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Polls a boolean condition, for workflow-level waits such as "the URL now
/// contains the confirmation marker".
pub async fn wait_until<F>(mut condition: F, timeout: Duration, timeout_message: &str) -> Result<()>
where
    F: FnMut() -> bool,
{
    poll(|| Ok(condition().then_some(())), timeout, timeout_message).await
}
