pub mod error;
pub mod timestamp;

pub use self::error::{CommandErrorKind, DriverError, ErrorLabels, Result};
pub use self::timestamp::{ClusterTime, Timestamp};
