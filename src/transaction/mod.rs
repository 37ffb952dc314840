// ============================================================================
// Transaction Module
// ============================================================================
//
// The per-session transaction state machine and the retry driver behind
// `SessionHandle::with_transaction`.
//
// ============================================================================

pub mod state;

pub(crate) mod runner;

pub use self::state::TransactionState;
