//! Deadline helpers for the session loop.
//!
//! Deadlines are raced inside `tokio::select!` against the transport instead
//! of wrapping whole futures, so work that has already started is never cut off.

use std::time::Duration;
use tokio::time::Instant;

/// Default heartbeat interval.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Absolute deadline `timeout` from now, if there is one.
pub fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|timeout| Instant::now() + timeout)
}

/// Complete at `deadline`, or never when there is none.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
