// ============================================================================
// QuorumDB Driver Library
// ============================================================================
//
// Client-side session and transaction coordination for QuorumDB clusters:
// - Pooled, reusable server sessions with idle-timeout quarantine
// - Causal-consistency metadata (cluster time / operation time) propagation
// - Reference-counted session handles with fork semantics
// - Multi-statement transactions with automatic, bounded retry
//
// Wire encoding, server selection, and connection management live behind the
// `dispatch` boundary traits and are provided by the transport layer.
// ============================================================================

pub mod cancellation;
pub mod core;
pub mod dispatch;
pub mod session;
pub mod sync;
pub mod transaction;

// Re-export the public surface
pub use crate::cancellation::CancellationToken;
pub use crate::core::{
    ClusterTime, CommandErrorKind, DriverError, ErrorLabels, Result, Timestamp,
};
pub use crate::dispatch::{
    CommandDispatcher, CommandStamps, SessionIdIssuer, TransactionContext, TransactionStamps,
    UuidSessionIdIssuer,
};
pub use crate::session::{
    Acknowledgment, ClientConfig, PoolStats, ReadConcern, ReadConcernLevel, ReadPreference,
    ServerSession, ServerSessionPool, SessionHandle, SessionId, SessionOptions,
    TransactionOptions, WriteConcern,
};
pub use crate::transaction::TransactionState;

use std::sync::Arc;

use crate::session::CoreSession;

// ============================================================================
// High-level Client API
// ============================================================================

/// Entry point for sessions and transactions.
///
/// A `Client` owns the process-wide server-session pool and hands out
/// [`SessionHandle`]s over it. Clones share the same pool. The transport
/// layer is injected as a [`CommandDispatcher`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use quorumdb_driver::{
///     CancellationToken, Client, ClientConfig, CommandDispatcher, Result, SessionId,
///     SessionOptions, TransactionContext,
/// };
///
/// struct LoopbackDispatcher;
///
/// #[async_trait]
/// impl CommandDispatcher for LoopbackDispatcher {
///     async fn commit_transaction(
///         &self,
///         _ctx: TransactionContext,
///         _cancel: &CancellationToken,
///     ) -> Result<()> {
///         Ok(())
///     }
///
///     async fn abort_transaction(
///         &self,
///         _ctx: TransactionContext,
///         _cancel: &CancellationToken,
///     ) -> Result<()> {
///         Ok(())
///     }
///
///     async fn end_sessions(&self, _ids: Vec<SessionId>) -> Result<()> {
///         Ok(())
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let client = Client::new(Arc::new(LoopbackDispatcher), ClientConfig::new()).unwrap();
/// let mut session = client.start_session(SessionOptions::new()).unwrap();
///
/// session.start_transaction(None).unwrap();
/// session.commit_transaction(&CancellationToken::new()).await.unwrap();
/// # });
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    pool: Arc<ServerSessionPool>,
    dispatcher: Arc<dyn CommandDispatcher>,
    config: ClientConfig,
}

impl Client {
    /// Create a client with the default UUID session-id issuer
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>, config: ClientConfig) -> Result<Self> {
        Self::with_issuer(dispatcher, Arc::new(UuidSessionIdIssuer), config)
    }

    /// Create a client with a custom session-id issuer
    pub fn with_issuer(
        dispatcher: Arc<dyn CommandDispatcher>,
        issuer: Arc<dyn SessionIdIssuer>,
        config: ClientConfig,
    ) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(ServerSessionPool::new(issuer, config.logical_session_timeout));
        Ok(Self {
            inner: Arc::new(ClientInner {
                pool,
                dispatcher,
                config,
            }),
        })
    }

    /// Start an explicit logical session
    pub fn start_session(&self, options: SessionOptions) -> Result<SessionHandle> {
        options.validate()?;
        Ok(self.build_session(options, false))
    }

    /// Start an implicit session, used by the dispatch layer to attach a
    /// session to operations issued without one.
    pub fn start_implicit_session(&self) -> SessionHandle {
        self.build_session(SessionOptions::new(), true)
    }

    fn build_session(&self, options: SessionOptions, implicit: bool) -> SessionHandle {
        let server_session = self.inner.pool.acquire();
        let core = CoreSession::new(
            server_session,
            options,
            self.inner.config.default_transaction_options.clone(),
            implicit,
        );
        SessionHandle::new(
            core,
            Arc::clone(&self.inner.dispatcher),
            Arc::clone(&self.inner.pool),
            self.inner.config.with_transaction_timeout,
        )
    }

    /// Server-session pool statistics
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Drain the session pool and best-effort notify the cluster that the
    /// drained sessions will not be reused. Delivery failures are swallowed;
    /// sessions self-expire server-side.
    pub async fn shutdown(&self) {
        let ids = self.inner.pool.clear();
        if ids.is_empty() {
            return;
        }
        if let Err(err) = self.inner.dispatcher.end_sessions(ids).await {
            tracing::debug!(error = %err, "ignoring end_sessions delivery failure");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("pool", &self.inner.pool)
            .finish()
    }
}
