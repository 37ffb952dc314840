use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::options::{SessionOptions, TransactionOptions, WriteConcern};
use super::server::{ServerSession, SessionId};
use crate::core::{ClusterTime, DriverError, Result, Timestamp};
use crate::dispatch::{CommandStamps, TransactionContext, TransactionStamps};
use crate::transaction::state::{Transaction, TransactionState};

/// What a commit or abort request requires of the dispatch layer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ControlAction {
    /// Nothing ever reached the server; the state change is purely local.
    Local,

    /// A command must be dispatched with this context.
    Dispatch(TransactionContext),
}

/// The single logical session object shared by every forked handle.
///
/// Holds the causal-consistency state (cluster time, operation time), the
/// transaction state machine, and the owned server session. Timestamp
/// advances are safe to call from any thread; transaction-control calls are
/// a single logical sequence and must be serialized by the caller when
/// handles are forked for concurrent use.
pub struct CoreSession {
    server_session: Arc<ServerSession>,

    /// Highest cluster time observed; greatest seen wins.
    cluster_time: Mutex<Option<ClusterTime>>,

    /// Highest operation time observed, packed for atomic `fetch_max`.
    /// Zero means no operation time has been observed yet.
    operation_time: AtomicU64,

    /// Read timestamp pinned by the first read of a snapshot session.
    snapshot_time: Mutex<Option<Timestamp>>,

    options: SessionOptions,
    causal_consistency: bool,
    implicit: bool,

    /// Client-level transaction defaults, applied under session defaults.
    client_transaction_defaults: Option<TransactionOptions>,

    transaction: Mutex<Transaction>,
}

impl CoreSession {
    pub(crate) fn new(
        server_session: Arc<ServerSession>,
        options: SessionOptions,
        client_transaction_defaults: Option<TransactionOptions>,
        implicit: bool,
    ) -> Self {
        let causal_consistency = options.effective_causal_consistency();
        Self {
            server_session,
            cluster_time: Mutex::new(None),
            operation_time: AtomicU64::new(0),
            snapshot_time: Mutex::new(None),
            options,
            causal_consistency,
            implicit,
            client_transaction_defaults,
            transaction: Mutex::new(Transaction::none()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.server_session.id()
    }

    pub fn server_session(&self) -> &Arc<ServerSession> {
        &self.server_session
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    pub fn causal_consistency(&self) -> bool {
        self.causal_consistency
    }

    pub fn is_snapshot(&self) -> bool {
        self.options.snapshot
    }

    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.cluster_time.lock().clone()
    }

    pub fn operation_time(&self) -> Option<Timestamp> {
        match self.operation_time.load(Ordering::SeqCst) {
            0 => None,
            bits => Some(Timestamp::from_bits(bits)),
        }
    }

    pub fn snapshot_time(&self) -> Option<Timestamp> {
        *self.snapshot_time.lock()
    }

    /// Advance the cluster time to the greater of current and `new`.
    /// Advancing with an older or equal value is a no-op, never an error.
    pub fn advance_cluster_time(&self, new: &ClusterTime) {
        let mut current = self.cluster_time.lock();
        let newer = match current.as_ref() {
            Some(held) => new.is_newer_than(held),
            None => true,
        };
        if newer {
            *current = Some(new.clone());
        }
    }

    /// Advance the operation time to the greater of current and `new`.
    /// Commutative and monotonic from any thread.
    pub fn advance_operation_time(&self, new: Timestamp) {
        self.operation_time.fetch_max(new.to_bits(), Ordering::SeqCst);
    }

    /// Pin the snapshot read timestamp. Only the first pin takes effect.
    pub fn pin_snapshot_time(&self, timestamp: Timestamp) {
        let mut pinned = self.snapshot_time.lock();
        if pinned.is_none() {
            *pinned = Some(timestamp);
        }
    }

    /// Mark the owned server session dirty after a network-level failure.
    pub fn mark_dirty(&self) {
        self.server_session.mark_dirty();
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction.lock().state
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_state().is_active()
    }

    /// Called by the dispatch layer before it sends a command under this
    /// session: refreshes the server session's last-use timestamp and returns
    /// the stamps to attach. The first command of a transaction moves it from
    /// `Starting` to `InProgress` and carries the start marker.
    pub fn about_to_send_command(&self) -> CommandStamps {
        self.server_session.touch();

        let transaction = {
            let mut txn = self.transaction.lock();
            match txn.state {
                TransactionState::Starting => {
                    txn.state = TransactionState::InProgress;
                    Some(TransactionStamps {
                        number: txn.number,
                        start: true,
                        read_concern: txn.options.as_ref().and_then(|o| o.read_concern),
                    })
                }
                TransactionState::InProgress => Some(TransactionStamps {
                    number: txn.number,
                    start: false,
                    read_concern: None,
                }),
                _ => None,
            }
        };

        let after_cluster_time = if self.causal_consistency {
            self.operation_time()
        } else {
            None
        };

        CommandStamps {
            session_id: self.id(),
            cluster_time: self.cluster_time(),
            after_cluster_time,
            at_cluster_time: if self.options.snapshot {
                self.snapshot_time()
            } else {
                None
            },
            transaction,
        }
    }

    /// Begin a transaction on this session.
    ///
    /// Valid from `NoTransaction`, `Committed`, or `Aborted`; the previous
    /// terminal state is implicitly reset. Purely local: the transaction
    /// reaches the server with its first stamped command.
    pub fn start_transaction(&self, options: Option<TransactionOptions>) -> Result<()> {
        if self.options.snapshot {
            return Err(DriverError::InvalidOperation(
                "transactions are not supported on snapshot sessions".into(),
            ));
        }

        let mut txn = self.transaction.lock();
        if !txn.state.can_start() {
            return Err(DriverError::InvalidOperation(format!(
                "cannot start a transaction while the current one is {}",
                txn.state
            )));
        }

        let effective = options
            .unwrap_or_default()
            .merge(self.options.default_transaction_options.as_ref())
            .merge(self.client_transaction_defaults.as_ref());
        let number = self.server_session.advance_transaction_number();

        *txn = Transaction {
            state: TransactionState::Starting,
            options: Some(effective),
            number,
        };
        Ok(())
    }

    /// Decide what committing requires right now.
    ///
    /// Policy: committing a transaction that is already `Committed` is a
    /// no-op success, which keeps a retried commit that observed success
    /// idempotent from the caller's side. Committing from `Starting` is also
    /// a no-op (nothing was ever sent) and transitions straight to
    /// `Committed`. A failed dispatch leaves the state `InProgress` so the
    /// commit itself can legally be retried.
    pub(crate) fn begin_commit(&self, retrying: bool) -> Result<ControlAction> {
        let mut txn = self.transaction.lock();
        match txn.state {
            TransactionState::NoTransaction => Err(DriverError::InvalidOperation(
                "no transaction started".into(),
            )),
            TransactionState::Aborted => Err(DriverError::InvalidOperation(
                "cannot commit an aborted transaction".into(),
            )),
            TransactionState::Committed => Ok(ControlAction::Local),
            TransactionState::Starting => {
                txn.state = TransactionState::Committed;
                Ok(ControlAction::Local)
            }
            TransactionState::InProgress => {
                Ok(ControlAction::Dispatch(self.transaction_context(&txn, retrying)))
            }
        }
    }

    /// Record that a dispatched commit succeeded.
    pub(crate) fn finish_commit(&self) {
        self.transaction.lock().state = TransactionState::Committed;
    }

    /// Record that the cluster no longer knows the transaction: a commit
    /// failed in a way that guarantees nothing was committed, so the commit
    /// cannot be retried and a fresh transaction may be started.
    pub(crate) fn transaction_invalidated(&self) {
        self.transaction.lock().state = TransactionState::Aborted;
    }

    /// Decide what aborting requires right now, transitioning to `Aborted`
    /// immediately so the session is never left with a half-dead transaction
    /// even if the abort command cannot be delivered.
    pub(crate) fn begin_abort(&self) -> Result<ControlAction> {
        let mut txn = self.transaction.lock();
        match txn.state {
            TransactionState::NoTransaction => Err(DriverError::InvalidOperation(
                "no transaction started".into(),
            )),
            TransactionState::Committed => Err(DriverError::InvalidOperation(
                "cannot abort a committed transaction".into(),
            )),
            TransactionState::Aborted => Err(DriverError::InvalidOperation(
                "cannot abort a transaction twice".into(),
            )),
            TransactionState::Starting => {
                txn.state = TransactionState::Aborted;
                Ok(ControlAction::Local)
            }
            TransactionState::InProgress => {
                let ctx = self.transaction_context(&txn, false);
                txn.state = TransactionState::Aborted;
                Ok(ControlAction::Dispatch(ctx))
            }
        }
    }

    fn transaction_context(&self, txn: &Transaction, retrying: bool) -> TransactionContext {
        let options = txn.options.as_ref();
        let write_concern = if retrying {
            Some(WriteConcern::upgraded_for_commit_retry(
                options.and_then(|o| o.write_concern.as_ref()),
            ))
        } else {
            options.and_then(|o| o.write_concern)
        };

        TransactionContext {
            session_id: self.id(),
            number: txn.number,
            write_concern,
            max_commit_time: options.and_then(|o| o.max_commit_time),
        }
    }
}

impl std::fmt::Debug for CoreSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreSession")
            .field("id", &self.id())
            .field("implicit", &self.implicit)
            .field("causal_consistency", &self.causal_consistency)
            .field("transaction_state", &self.transaction_state())
            .finish()
    }
}
