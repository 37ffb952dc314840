//! Boundary contracts between the session core and its collaborators.
//!
//! The session layer never encodes wire documents. Before sending a command,
//! the dispatch layer asks the session for [`CommandStamps`] to attach; after
//! a reply it feeds any gossiped timestamps back through the session's
//! `advance_*` methods, and marks the session dirty on network failure.

use std::time::Duration;

use async_trait::async_trait;

use crate::cancellation::CancellationToken;
use crate::core::{ClusterTime, Result, Timestamp};
use crate::session::options::{ReadConcern, WriteConcern};
use crate::session::server::SessionId;

/// Issues server-session identifiers when the idle pool is empty.
///
/// QuorumDB session identifiers are client-generated, so the default issuer
/// mints UUIDs locally and no network round trip is needed.
pub trait SessionIdIssuer: Send + Sync {
    fn issue_session_id(&self) -> SessionId;
}

/// The default issuer: random v4 UUIDs.
#[derive(Debug, Default)]
pub struct UuidSessionIdIssuer;

impl SessionIdIssuer for UuidSessionIdIssuer {
    fn issue_session_id(&self) -> SessionId {
        SessionId::new()
    }
}

/// Values the dispatch layer must attach to the next outgoing command.
///
/// Produced by `about_to_send_command`; the exact wire encoding is the
/// dispatch layer's responsibility.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStamps {
    /// The server session the command runs under.
    pub session_id: SessionId,

    /// Highest cluster time this session has observed, for gossip.
    pub cluster_time: Option<ClusterTime>,

    /// Causal-consistency read stamp: the session's operation time, present
    /// when causal consistency is enabled and a prior operation was observed.
    pub after_cluster_time: Option<Timestamp>,

    /// Pinned read timestamp for snapshot sessions.
    pub at_cluster_time: Option<Timestamp>,

    /// Present while a transaction is active on the session.
    pub transaction: Option<TransactionStamps>,
}

/// Transaction fields for an outgoing command.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionStamps {
    /// The transaction number on the server session.
    pub number: u64,

    /// True exactly once per transaction, on its first command.
    pub start: bool,

    /// The transaction's read concern; only carried when `start` is true.
    pub read_concern: Option<ReadConcern>,
}

/// Everything the dispatch layer needs to send a commit or abort command.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionContext {
    pub session_id: SessionId,
    pub number: u64,
    pub write_concern: Option<WriteConcern>,
    pub max_commit_time: Option<Duration>,
}

/// The command-dispatch collaborator: server selection, connection checkout,
/// wire encoding, and per-operation deadlines all live behind this trait.
///
/// Implementations translate their failures into [`crate::DriverError`]
/// values, attaching any labels the server reply carried via
/// [`crate::ErrorLabels::from_labels`].
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Send `commitTransaction` for the given context.
    async fn commit_transaction(
        &self,
        ctx: TransactionContext,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Send `abortTransaction` for the given context.
    async fn abort_transaction(
        &self,
        ctx: TransactionContext,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Notify the cluster that the given sessions will not be reused.
    /// Best-effort: sessions self-expire server-side.
    async fn end_sessions(&self, ids: Vec<SessionId>) -> Result<()>;
}
