//! Deadlines for outbound calls.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// The call did not finish within its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {0:?}")]
pub struct TimeoutError(pub Duration);

/// Run `future` with a deadline.
pub async fn with_timeout<F: Future>(deadline: Duration, future: F) -> Result<F::Output, TimeoutError> {
    tokio::time::timeout(deadline, future)
        .await
        .map_err(|_| TimeoutError(deadline))
}
