//! The retry driver behind `SessionHandle::with_transaction`.
//!
//! Two failure classes get two retry policies. A `TransientTransactionError`
//! means the transaction was never committed, so the whole unit of work is
//! redone from a fresh transaction. An `UnknownTransactionCommitResult`
//! means the commit may already have been applied server-side; only the
//! commit command itself is retried (it is idempotent at the protocol
//! level), with the write concern upgraded to majority. Both policies are
//! bounded by one wall-clock budget measured from the first attempt, and
//! cancellation beats every retry decision.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;

use crate::cancellation::CancellationToken;
use crate::core::{DriverError, Result};
use crate::session::handle::SessionHandle;
use crate::session::options::TransactionOptions;

/// Pause between commit-only retries; long enough to let an election settle
/// a tick, short enough to stay well inside the retry budget.
const COMMIT_RETRY_BACKOFF: Duration = Duration::from_millis(10);

pub(crate) async fn run_with_retry<R, F>(
    handle: &mut SessionHandle,
    mut callback: F,
    options: Option<TransactionOptions>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<R>
where
    F: for<'a> FnMut(&'a mut SessionHandle, CancellationToken) -> BoxFuture<'a, Result<R>> + Send,
    R: Send,
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;

    'attempt: loop {
        attempt += 1;
        cancel.checkpoint()?;

        // A failure to even begin is not retryable at this layer.
        handle.start_transaction(options.clone())?;

        let value = match callback(handle, cancel.clone()).await {
            Ok(value) => value,
            Err(err) => {
                abort_if_active(handle, cancel).await;
                if cancel.is_cancelled() || matches!(err, DriverError::Cancelled) {
                    return Err(DriverError::Cancelled);
                }
                if err.is_transient_transaction_error() && Instant::now() < deadline {
                    tracing::debug!(attempt, error = %err, "retrying transaction callback");
                    continue 'attempt;
                }
                return Err(err);
            }
        };

        // The callback may have committed or aborted on its own.
        if !handle.in_transaction()? {
            return Ok(value);
        }

        let mut retrying_commit = false;
        loop {
            if cancel.is_cancelled() {
                abort_if_active(handle, cancel).await;
                return Err(DriverError::Cancelled);
            }

            match handle.commit_internal(retrying_commit, cancel).await {
                Ok(()) => return Ok(value),
                Err(err) => {
                    if cancel.is_cancelled() {
                        return Err(DriverError::Cancelled);
                    }
                    if Instant::now() >= deadline {
                        return Err(err);
                    }
                    if err.is_unknown_commit_result()
                        && (err.is_retryable_write() || err.is_timeout())
                    {
                        tracing::debug!(attempt, error = %err, "retrying ambiguous commit");
                        retrying_commit = true;
                        tokio::time::sleep(COMMIT_RETRY_BACKOFF).await;
                        continue;
                    }
                    if err.is_transient_transaction_error() {
                        tracing::debug!(attempt, error = %err, "retrying transaction after failed commit");
                        continue 'attempt;
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Best-effort abort after a callback failure; delivery errors are already
/// swallowed by `abort_transaction`, invalid-state errors only mean the
/// callback finished the transaction itself.
async fn abort_if_active(handle: &mut SessionHandle, cancel: &CancellationToken) {
    let active = matches!(handle.transaction_state(), Ok(state) if state.is_active());
    if active {
        if let Err(err) = handle.abort_transaction(cancel).await {
            tracing::debug!(error = %err, "best-effort abort failed");
        }
    }
}
