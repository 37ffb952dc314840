use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{DriverError, Result};

/// Read concern level for operations inside a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadConcernLevel {
    Local,
    Majority,
    Snapshot,
    Linearizable,
}

/// Read concern attached to the first command of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadConcern {
    pub level: ReadConcernLevel,
}

impl ReadConcern {
    pub fn local() -> Self {
        Self {
            level: ReadConcernLevel::Local,
        }
    }

    pub fn majority() -> Self {
        Self {
            level: ReadConcernLevel::Majority,
        }
    }

    pub fn snapshot() -> Self {
        Self {
            level: ReadConcernLevel::Snapshot,
        }
    }
}

/// Write acknowledgment requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Acknowledgment {
    /// Acknowledged by this many nodes
    Nodes(u32),
    /// Acknowledged by a majority of the replica set
    Majority,
}

/// Write concern for the transaction's commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteConcern {
    pub w: Option<Acknowledgment>,
    pub journal: Option<bool>,
    pub w_timeout: Option<Duration>,
}

impl WriteConcern {
    /// Majority acknowledgment
    pub fn majority() -> Self {
        Self {
            w: Some(Acknowledgment::Majority),
            journal: None,
            w_timeout: None,
        }
    }

    /// Acknowledged by `n` nodes
    pub fn nodes(n: u32) -> Self {
        Self {
            w: Some(Acknowledgment::Nodes(n)),
            journal: None,
            w_timeout: None,
        }
    }

    /// Set the acknowledgment timeout
    pub fn w_timeout(mut self, timeout: Duration) -> Self {
        self.w_timeout = Some(timeout);
        self
    }

    /// Require journal durability
    pub fn journal(mut self, journal: bool) -> Self {
        self.journal = Some(journal);
        self
    }

    /// The write concern used when a commit is retried after an ambiguous
    /// outcome: majority acknowledgment, with a bounded wait so a retried
    /// commit cannot block forever behind an unhealthy majority.
    pub(crate) fn upgraded_for_commit_retry(base: Option<&WriteConcern>) -> WriteConcern {
        const DEFAULT_COMMIT_RETRY_W_TIMEOUT: Duration = Duration::from_secs(10);

        let base = base.copied().unwrap_or_default();
        WriteConcern {
            w: Some(Acknowledgment::Majority),
            journal: base.journal,
            w_timeout: base.w_timeout.or(Some(DEFAULT_COMMIT_RETRY_W_TIMEOUT)),
        }
    }
}

/// Which cluster members a transaction's reads may target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadPreference {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

/// Options in effect for one transaction
///
/// Unset fields fall back to the session's defaults, then the client's.
///
/// # Examples
///
/// ```
/// use quorumdb_driver::{ReadConcern, TransactionOptions, WriteConcern};
///
/// let options = TransactionOptions::new()
///     .read_concern(ReadConcern::snapshot())
///     .write_concern(WriteConcern::majority());
///
/// assert_eq!(options.read_concern, Some(ReadConcern::snapshot()));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionOptions {
    pub read_concern: Option<ReadConcern>,
    pub write_concern: Option<WriteConcern>,
    pub read_preference: Option<ReadPreference>,

    /// Server-side cap on commit execution time
    pub max_commit_time: Option<Duration>,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = Some(read_concern);
        self
    }

    pub fn write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = Some(write_concern);
        self
    }

    pub fn read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = Some(read_preference);
        self
    }

    pub fn max_commit_time(mut self, max_commit_time: Duration) -> Self {
        self.max_commit_time = Some(max_commit_time);
        self
    }

    /// Fill unset fields from `defaults`
    pub fn merge(mut self, defaults: Option<&TransactionOptions>) -> Self {
        if let Some(defaults) = defaults {
            self.read_concern = self.read_concern.or(defaults.read_concern);
            self.write_concern = self.write_concern.or(defaults.write_concern);
            self.read_preference = self.read_preference.or(defaults.read_preference);
            self.max_commit_time = self.max_commit_time.or(defaults.max_commit_time);
        }
        self
    }
}

/// Options for a logical session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    /// Causal consistency; defaults to on unless `snapshot` is set
    pub causal_consistency: Option<bool>,

    /// Snapshot reads: pin all reads in the session to one cluster time
    pub snapshot: bool,

    /// Defaults for transactions started on this session
    pub default_transaction_options: Option<TransactionOptions>,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn causal_consistency(mut self, enabled: bool) -> Self {
        self.causal_consistency = Some(enabled);
        self
    }

    pub fn snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn default_transaction_options(mut self, options: TransactionOptions) -> Self {
        self.default_transaction_options = Some(options);
        self
    }

    /// The causal-consistency flag after defaulting
    pub fn effective_causal_consistency(&self) -> bool {
        self.causal_consistency.unwrap_or(!self.snapshot)
    }

    /// Validate option combinations
    pub fn validate(&self) -> Result<()> {
        if self.snapshot && self.causal_consistency == Some(true) {
            return Err(DriverError::Configuration(
                "snapshot reads and causal consistency cannot both be enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Client-wide session and transaction configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server-advertised idle timeout for server sessions.
    /// `None` means the cluster does not expire sessions.
    pub logical_session_timeout: Option<Duration>,

    /// Defaults for transactions on every session of this client
    pub default_transaction_options: Option<TransactionOptions>,

    /// Wall-clock retry budget for `with_transaction`
    pub with_transaction_timeout: Duration,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            logical_session_timeout: Some(Duration::from_secs(30 * 60)),
            default_transaction_options: None,
            with_transaction_timeout: Duration::from_secs(120),
        }
    }

    pub fn logical_session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.logical_session_timeout = timeout;
        self
    }

    pub fn default_transaction_options(mut self, options: TransactionOptions) -> Self {
        self.default_transaction_options = Some(options);
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.with_transaction_timeout = timeout;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.with_transaction_timeout.is_zero() {
            return Err(DriverError::Configuration(
                "with_transaction_timeout must be greater than zero".into(),
            ));
        }
        if let Some(timeout) = self.logical_session_timeout {
            if timeout.is_zero() {
                return Err(DriverError::Configuration(
                    "logical_session_timeout must be greater than zero".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
