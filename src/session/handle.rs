use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;

use super::core::{ControlAction, CoreSession};
use super::options::{SessionOptions, TransactionOptions};
use super::pool::ServerSessionPool;
use super::server::SessionId;
use crate::cancellation::CancellationToken;
use crate::core::{ClusterTime, DriverError, Result, Timestamp};
use crate::dispatch::{CommandDispatcher, CommandStamps};
use crate::transaction::runner;
use crate::transaction::state::TransactionState;

/// Shared ownership record behind every forked handle: the session itself,
/// an explicit reference count, and a one-shot release guard so the server
/// session goes back to the pool exactly once no matter the disposal order.
pub(crate) struct SharedSession {
    core: CoreSession,
    dispatcher: Arc<dyn CommandDispatcher>,
    pool: Arc<ServerSessionPool>,
    ref_count: AtomicUsize,
    released: AtomicBool,
    with_transaction_timeout: Duration,
}

/// A handle to a reference-counted logical session.
///
/// [`fork`](SessionHandle::fork) creates an additional handle aliasing the
/// same session; the underlying server session is returned to the pool when
/// the last handle is released (explicitly or on drop). Operations on a
/// released handle fail with [`DriverError::SessionDisposed`].
///
/// Timestamp advances are safe to call concurrently from forked handles.
/// Transaction control (start/commit/abort) is a single logical sequence;
/// callers forking a handle for concurrent work inside one transaction are
/// responsible for serializing those calls.
pub struct SessionHandle {
    shared: Arc<SharedSession>,
    disposed: bool,
}

impl SessionHandle {
    pub(crate) fn new(
        core: CoreSession,
        dispatcher: Arc<dyn CommandDispatcher>,
        pool: Arc<ServerSessionPool>,
        with_transaction_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(SharedSession {
                core,
                dispatcher,
                pool,
                ref_count: AtomicUsize::new(1),
                released: AtomicBool::new(false),
                with_transaction_timeout,
            }),
            disposed: false,
        }
    }

    fn core(&self) -> Result<&CoreSession> {
        if self.disposed {
            Err(DriverError::SessionDisposed)
        } else {
            Ok(&self.shared.core)
        }
    }

    /// Create another handle aliasing the same logical session.
    pub fn fork(&self) -> Result<SessionHandle> {
        if self.disposed {
            return Err(DriverError::SessionDisposed);
        }
        self.shared.ref_count.fetch_add(1, Ordering::SeqCst);
        Ok(SessionHandle {
            shared: Arc::clone(&self.shared),
            disposed: false,
        })
    }

    /// Release this handle. Idempotent; when the last handle is released the
    /// server session is returned to the pool (or discarded if dirty).
    pub fn release(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if self.shared.ref_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Last handle; the swap guarantees the teardown runs once.
            if !self.shared.released.swap(true, Ordering::SeqCst) {
                if self.shared.core.in_transaction() {
                    tracing::warn!(
                        session_id = %self.shared.core.id(),
                        "session released with an active transaction; the cluster will reap it"
                    );
                }
                self.shared
                    .pool
                    .release(Arc::clone(self.shared.core.server_session()));
            }
        }
    }

    /// The server-session identifier backing this handle
    pub fn id(&self) -> Result<SessionId> {
        Ok(self.core()?.id())
    }

    pub fn options(&self) -> Result<&SessionOptions> {
        Ok(self.core()?.options())
    }

    pub fn is_implicit(&self) -> Result<bool> {
        Ok(self.core()?.is_implicit())
    }

    pub fn cluster_time(&self) -> Result<Option<ClusterTime>> {
        Ok(self.core()?.cluster_time())
    }

    pub fn operation_time(&self) -> Result<Option<Timestamp>> {
        Ok(self.core()?.operation_time())
    }

    pub fn transaction_state(&self) -> Result<TransactionState> {
        Ok(self.core()?.transaction_state())
    }

    /// Whether a transaction is currently active on this session
    pub fn in_transaction(&self) -> Result<bool> {
        Ok(self.core()?.in_transaction())
    }

    /// See [`CoreSession::advance_cluster_time`]
    pub fn advance_cluster_time(&self, new: &ClusterTime) -> Result<()> {
        self.core()?.advance_cluster_time(new);
        Ok(())
    }

    /// See [`CoreSession::advance_operation_time`]
    pub fn advance_operation_time(&self, new: Timestamp) -> Result<()> {
        self.core()?.advance_operation_time(new);
        Ok(())
    }

    /// Called by the dispatch layer before sending a command
    pub fn about_to_send_command(&self) -> Result<CommandStamps> {
        Ok(self.core()?.about_to_send_command())
    }

    /// Called by the dispatch layer after a network-level failure
    pub fn mark_dirty(&self) -> Result<()> {
        self.core()?.mark_dirty();
        Ok(())
    }

    /// Begin a transaction with the given options merged over the session
    /// and client defaults.
    pub fn start_transaction(&mut self, options: Option<TransactionOptions>) -> Result<()> {
        self.core()?.start_transaction(options)
    }

    /// Commit the active transaction.
    ///
    /// Committing a transaction in which no operation ever ran, or one that
    /// is already committed, succeeds without sending anything.
    pub async fn commit_transaction(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.commit_internal(false, cancel).await
    }

    pub(crate) async fn commit_internal(
        &mut self,
        retrying: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.checkpoint()?;
        let action = self.core()?.begin_commit(retrying)?;
        match action {
            ControlAction::Local => Ok(()),
            ControlAction::Dispatch(ctx) => {
                let result = self.shared.dispatcher.commit_transaction(ctx, cancel).await;
                match result {
                    Ok(()) => {
                        self.shared.core.finish_commit();
                        Ok(())
                    }
                    Err(err) => {
                        let err = err.labeled_for_commit();
                        let commit_retryable = err.is_unknown_commit_result()
                            && (err.is_retryable_write() || err.is_timeout());
                        if err.is_transient_transaction_error() && !commit_retryable {
                            // The server guarantees nothing was committed;
                            // only a fresh transaction is legal from here.
                            self.shared.core.transaction_invalidated();
                        }
                        Err(err)
                    }
                }
            }
        }
    }

    /// Abort the active transaction.
    ///
    /// The session transitions to `Aborted` immediately; a failure delivering
    /// the abort command is logged and swallowed, since the cluster reaps
    /// abandoned transactions on its own.
    pub async fn abort_transaction(&mut self, cancel: &CancellationToken) -> Result<()> {
        let action = self.core()?.begin_abort()?;
        match action {
            ControlAction::Local => Ok(()),
            ControlAction::Dispatch(ctx) => {
                cancel.checkpoint()?;
                if let Err(err) = self.shared.dispatcher.abort_transaction(ctx, cancel).await {
                    tracing::debug!(error = %err, "ignoring abort delivery failure");
                }
                Ok(())
            }
        }
    }

    /// Execute `callback` inside a transaction, retrying on transient cluster
    /// errors until it commits or the retry budget expires.
    ///
    /// # Callback contract
    ///
    /// The callback may run **more than once**: every retry re-invokes it
    /// from the top, so it must be free of unrecoverable side effects outside
    /// the transaction. It must also surface every error it observes rather
    /// than swallow it; a swallowed error hides an aborted transaction from
    /// the retry logic and leads to a commit of nothing.
    ///
    /// If the callback returns without committing, the commit is performed
    /// here, with an ambiguous outcome retried as a commit-only operation.
    pub async fn with_transaction<R, F>(
        &mut self,
        callback: F,
        options: Option<TransactionOptions>,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        F: for<'a> FnMut(&'a mut SessionHandle, CancellationToken) -> BoxFuture<'a, Result<R>>
            + Send,
        R: Send,
    {
        let timeout = self.shared.with_transaction_timeout;
        runner::run_with_retry(self, callback, options, timeout, cancel).await
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("disposed", &self.disposed)
            .field("ref_count", &self.shared.ref_count.load(Ordering::SeqCst))
            .finish()
    }
}
