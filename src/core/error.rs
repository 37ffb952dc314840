use thiserror::Error;

/// Wire label attached by the cluster when the whole transaction is safe to
/// retry from the beginning.
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// Wire label attached when the outcome of a commit is unknown and the commit
/// command itself may be retried.
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

/// Server error codes eligible for retryable writes (stepdowns, elections,
/// shutdowns, failovers).
const RETRYABLE_WRITE_CODES: &[i32] = &[
    6,     // HostUnreachable
    7,     // HostNotFound
    89,    // NetworkTimeout
    91,    // ShutdownInProgress
    189,   // PrimarySteppedDown
    262,   // ExceededTimeLimit
    9001,  // SocketException
    10107, // NotWritablePrimary
    11600, // InterruptedAtShutdown
    11602, // InterruptedDueToReplStateChange
    13435, // NotPrimaryNoSecondaryOk
    13436, // NotPrimaryOrSecondary
];

/// The set of retry-relevant labels carried by a command failure.
///
/// Labels are classified exactly once, at the boundary where the dispatch
/// layer's failure is translated into a [`DriverError`]; everything above
/// that boundary only reads the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorLabels {
    /// The transaction was never committed; the whole unit of work may be
    /// re-executed.
    pub transient_transaction: bool,

    /// The commit outcome is unknown; the commit command may be retried.
    pub unknown_commit_result: bool,
}

impl ErrorLabels {
    /// No labels
    pub const NONE: ErrorLabels = ErrorLabels {
        transient_transaction: false,
        unknown_commit_result: false,
    };

    /// Only `TransientTransactionError`
    pub fn transient() -> Self {
        Self {
            transient_transaction: true,
            unknown_commit_result: false,
        }
    }

    /// Only `UnknownTransactionCommitResult`
    pub fn unknown_commit() -> Self {
        Self {
            transient_transaction: false,
            unknown_commit_result: true,
        }
    }

    /// Parse the label strings carried by a server reply
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut out = Self::NONE;
        for label in labels {
            match label.as_ref() {
                TRANSIENT_TRANSACTION_ERROR => out.transient_transaction = true,
                UNKNOWN_TRANSACTION_COMMIT_RESULT => out.unknown_commit_result = true,
                _ => {}
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        !self.transient_transaction && !self.unknown_commit_result
    }

    /// The canonical wire spelling of the set labels
    pub fn as_strings(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.transient_transaction {
            out.push(TRANSIENT_TRANSACTION_ERROR);
        }
        if self.unknown_commit_result {
            out.push(UNKNOWN_TRANSACTION_COMMIT_RESULT);
        }
        out
    }
}

/// How a command failure manifested at the dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    /// The connection failed or was reset mid-operation.
    Network,

    /// The per-operation deadline enforced by the dispatch layer expired.
    Timeout,

    /// The cluster replied with an error code.
    Server { code: i32 },
}

#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Session has already been released")]
    SessionDisposed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Command failed: {message}")]
    Command {
        message: String,
        kind: CommandErrorKind,
        labels: ErrorLabels,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;

impl DriverError {
    /// A network-level command failure
    pub fn network(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
            kind: CommandErrorKind::Network,
            labels: ErrorLabels::NONE,
        }
    }

    /// A per-operation timeout from the dispatch layer
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
            kind: CommandErrorKind::Timeout,
            labels: ErrorLabels::NONE,
        }
    }

    /// A server-reported command failure
    pub fn server(code: i32, message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
            kind: CommandErrorKind::Server { code },
            labels: ErrorLabels::NONE,
        }
    }

    /// Attach labels to a command failure; no-op for other variants
    pub fn with_labels(mut self, new_labels: ErrorLabels) -> Self {
        if let Self::Command { labels, .. } = &mut self {
            *labels = new_labels;
        }
        self
    }

    /// The label set carried by this failure (empty for non-command errors)
    pub fn labels(&self) -> ErrorLabels {
        match self {
            Self::Command { labels, .. } => *labels,
            _ => ErrorLabels::NONE,
        }
    }

    /// Whether the whole transaction may be retried from the beginning
    pub fn is_transient_transaction_error(&self) -> bool {
        self.labels().transient_transaction
    }

    /// Whether the commit outcome is unknown
    pub fn is_unknown_commit_result(&self) -> bool {
        self.labels().unknown_commit_result
    }

    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Command {
                kind: CommandErrorKind::Network,
                ..
            }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Command {
                kind: CommandErrorKind::Timeout,
                ..
            }
        )
    }

    /// Whether this failure is eligible for a retryable write: a network
    /// blip, a timeout, or one of the stepdown/shutdown server codes.
    pub fn is_retryable_write(&self) -> bool {
        match self {
            Self::Command { kind, .. } => match kind {
                CommandErrorKind::Network | CommandErrorKind::Timeout => true,
                CommandErrorKind::Server { code } => RETRYABLE_WRITE_CODES.contains(code),
            },
            _ => false,
        }
    }

    /// Classify a failure observed while committing a transaction.
    ///
    /// A network error, timeout, or retryable server code during commit means
    /// the commit may or may not have been applied, so the failure gains the
    /// `UnknownTransactionCommitResult` label. Labels already present are
    /// preserved.
    pub fn labeled_for_commit(mut self) -> Self {
        if self.is_retryable_write() {
            if let Self::Command { labels, .. } = &mut self {
                labels.unknown_commit_result = true;
            }
        }
        self
    }
}
