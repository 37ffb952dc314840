use serde::{Deserialize, Serialize};

/// Logical timestamp used for causal ordering across the cluster.
///
/// A timestamp is a `(time, increment)` pair: wall-clock seconds plus an
/// ordinal distinguishing operations within the same second. The derived
/// ordering compares `time` first, then `increment`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Seconds component.
    pub time: u32,

    /// Ordinal within the second.
    pub increment: u32,
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(time: u32, increment: u32) -> Self {
        Self { time, increment }
    }

    /// Pack into a `u64` whose integer ordering matches timestamp ordering.
    ///
    /// This lets the session store its operation time in an `AtomicU64` and
    /// advance it with `fetch_max`, so concurrent advances from any number of
    /// threads converge on the maximum observed value. A packed value of zero
    /// is reserved for "no timestamp observed yet".
    pub(crate) fn to_bits(self) -> u64 {
        (u64::from(self.time) << 32) | u64::from(self.increment)
    }

    pub(crate) fn from_bits(bits: u64) -> Self {
        Self {
            time: (bits >> 32) as u32,
            increment: bits as u32,
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Timestamp({}, {})", self.time, self.increment)
    }
}

/// The cluster time document gossiped between client and cluster.
///
/// The cluster signs the time it advertises; the signature is opaque to the
/// driver and is carried back verbatim when the stamp is attached to an
/// outgoing command. Only the `timestamp` field participates in the
/// "greatest seen wins" comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterTime {
    /// The logical time advertised by the cluster.
    pub timestamp: Timestamp,

    /// Opaque signature material produced by the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<serde_json::Value>,
}

impl ClusterTime {
    /// Create an unsigned cluster time
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            signature: None,
        }
    }

    /// Attach signature material received from the cluster
    pub fn with_signature(mut self, signature: serde_json::Value) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Whether this cluster time is strictly newer than `other`
    pub fn is_newer_than(&self, other: &ClusterTime) -> bool {
        self.timestamp > other.timestamp
    }
}

impl std::fmt::Display for ClusterTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClusterTime({})", self.timestamp)
    }
}
