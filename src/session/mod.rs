// ============================================================================
// Session Module
// ============================================================================
//
// Logical sessions over pooled server sessions: causal-consistency state,
// reference-counted handles, and the options surface.
//
// ============================================================================

pub mod core;
pub mod handle;
pub mod options;
pub mod pool;
pub mod server;

pub use self::core::CoreSession;
pub use self::handle::SessionHandle;
pub use self::options::{
    Acknowledgment, ClientConfig, ReadConcern, ReadConcernLevel, ReadPreference, SessionOptions,
    TransactionOptions, WriteConcern,
};
pub use self::pool::{PoolStats, ServerSessionPool};
pub use self::server::{ServerSession, SessionId};
