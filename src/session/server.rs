use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for a server session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mint a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

/// Safety margin subtracted from the server's idle timeout. A session within
/// one minute of expiring is treated as already expired, so an acquired
/// session cannot lapse mid-operation.
const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// One server-side session: an identifier the cluster recognizes, plus the
/// bookkeeping the pool needs to decide whether it can be reused.
///
/// # Thread Safety
///
/// All fields use interior mutability so a session shared behind `Arc` can be
/// touched from whichever thread carries the owning logical session.
#[derive(Debug)]
pub struct ServerSession {
    id: SessionId,

    /// When the session last backed a command.
    last_use: Mutex<Instant>,

    /// Monotonic transaction counter; incremented on every transaction start.
    transaction_number: AtomicU64,

    /// Set irreversibly when a network error occurred while this session was
    /// attached to the failing operation. Dirty sessions are never reused.
    dirty: AtomicBool,
}

impl ServerSession {
    pub(crate) fn new(id: SessionId) -> Self {
        Self {
            id,
            last_use: Mutex::new(Instant::now()),
            transaction_number: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Refresh the last-use timestamp
    pub fn touch(&self) {
        *self.last_use.lock() = Instant::now();
    }

    pub fn last_use(&self) -> Instant {
        *self.last_use.lock()
    }

    /// Mark the session unusable. Irreversible.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Increment the transaction counter and return the new value
    pub fn advance_transaction_number(&self) -> u64 {
        self.transaction_number.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn transaction_number(&self) -> u64 {
        self.transaction_number.load(Ordering::SeqCst)
    }

    /// Whether the session is too close to the server's idle timeout to be
    /// handed out again. `None` means the cluster never expires sessions.
    pub fn is_about_to_expire(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(timeout) => {
                let usable = timeout.saturating_sub(EXPIRY_SAFETY_MARGIN);
                self.last_use.lock().elapsed() >= usable
            }
            None => false,
        }
    }
}
