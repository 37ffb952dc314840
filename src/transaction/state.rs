use crate::session::options::TransactionOptions;

/// Transaction lifecycle on one session
///
/// State transitions:
/// ```text
/// NoTransaction ──start──> Starting ──first operation──> InProgress
///                             │                              │
///                             ├──────────commit──────────────┤──> Committed
///                             └──────────abort───────────────┴──> Aborted
///
/// Committed / Aborted ──start──> Starting   (implicit reset)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction has been started on the session
    NoTransaction,

    /// A transaction was started but no operation has executed in it yet;
    /// nothing has reached the server
    Starting,

    /// At least one operation has executed inside the transaction
    InProgress,

    /// The transaction was successfully committed
    Committed,

    /// The transaction was aborted
    Aborted,
}

impl TransactionState {
    /// Whether a new transaction may be started from this state
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            TransactionState::NoTransaction
                | TransactionState::Committed
                | TransactionState::Aborted
        )
    }

    /// Whether a transaction is currently active (commit/abort are legal)
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Starting | TransactionState::InProgress)
    }

    /// Whether the transaction reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::NoTransaction => write!(f, "NO TRANSACTION"),
            TransactionState::Starting => write!(f, "STARTING"),
            TransactionState::InProgress => write!(f, "IN PROGRESS"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// The transaction record kept per session: current state, the effective
/// options recorded at start, and the server-session transaction number the
/// attempt runs under.
#[derive(Debug, Clone)]
pub(crate) struct Transaction {
    pub state: TransactionState,
    pub options: Option<TransactionOptions>,
    pub number: u64,
}

impl Transaction {
    pub fn none() -> Self {
        Self {
            state: TransactionState::NoTransaction,
            options: None,
            number: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_allowed_states() {
        assert!(TransactionState::NoTransaction.can_start());
        assert!(TransactionState::Committed.can_start());
        assert!(TransactionState::Aborted.can_start());

        assert!(!TransactionState::Starting.can_start());
        assert!(!TransactionState::InProgress.can_start());
    }

    #[test]
    fn test_active_states() {
        assert!(TransactionState::Starting.is_active());
        assert!(TransactionState::InProgress.is_active());

        assert!(!TransactionState::NoTransaction.is_active());
        assert!(!TransactionState::Committed.is_active());
        assert!(!TransactionState::Aborted.is_active());
    }

    #[test]
    fn test_terminal_states() {
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::Aborted.is_terminal());

        assert!(!TransactionState::NoTransaction.is_terminal());
        assert!(!TransactionState::Starting.is_terminal());
        assert!(!TransactionState::InProgress.is_terminal());
    }
}
