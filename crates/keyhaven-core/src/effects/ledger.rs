//! Ledger effect
//!
//! The ledger is the only durable state in Keyhaven. Records are opaque byte values
//! under string keys, each carrying a version that starts at 1 and increments on every
//! write. Mutations arrive as a [`Transaction`]: a set of compare-and-set writes plus
//! the audit events describing the transition. A transaction is applied all or
//! nothing. If any write's expected version does not match, nothing is written and no
//! event is appended.
//!
//! Records are serialized with `serde_json`. [`load_record`], [`load_records`] and the
//! [`ConditionalWrite`] constructors do the (de)serialization so callers work with
//! typed values.

use crate::errors::{KeyhavenError, KeyhavenResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A value together with its ledger version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Version of the record, starting at 1
    pub version: u64,
    /// Record value
    pub value: T,
}

impl<T> Versioned<T> {
    /// Map the value, keeping the version
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            version: self.version,
            value: f(self.value),
        }
    }
}

/// One compare-and-set write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalWrite {
    /// Record key
    pub key: String,
    /// `None` means the key must not exist yet
    pub expected_version: Option<u64>,
    /// New record bytes
    pub value: Vec<u8>,
}

impl ConditionalWrite {
    /// Write `value` under `key`, which must not exist yet
    pub fn insert<T: Serialize>(key: impl Into<String>, value: &T) -> KeyhavenResult<Self> {
        Ok(Self {
            key: key.into(),
            expected_version: None,
            value: serde_json::to_vec(value)?,
        })
    }

    /// Overwrite `key`, which must currently be at `expected_version`
    pub fn update<T: Serialize>(
        key: impl Into<String>,
        expected_version: u64,
        value: &T,
    ) -> KeyhavenResult<Self> {
        Ok(Self {
            key: key.into(),
            expected_version: Some(expected_version),
            value: serde_json::to_vec(value)?,
        })
    }
}

/// An event to append when its transaction commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent {
    /// Fact type tag, e.g. `share-stored`
    pub fact_type: String,
    /// Ledger key of the record the event concerns
    pub key: String,
    /// Serialized fact
    pub payload: Vec<u8>,
}

impl PendingEvent {
    /// Build an event whose payload is `fact` serialized as JSON
    pub fn json<T: Serialize>(
        fact_type: impl Into<String>,
        key: impl Into<String>,
        fact: &T,
    ) -> KeyhavenResult<Self> {
        Ok(Self {
            fact_type: fact_type.into(),
            key: key.into(),
            payload: serde_json::to_vec(fact)?,
        })
    }
}

/// An appended journal entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Position in the journal, starting at 1
    pub seq: u64,
    /// Fact type tag
    pub fact_type: String,
    /// Ledger key of the record the event concerns
    pub key: String,
    /// Serialized fact
    pub payload: Vec<u8>,
    /// Commit time in milliseconds
    pub timestamp_ms: u64,
}

impl LedgerEvent {
    /// Decode the payload as JSON
    pub fn decode<T: DeserializeOwned>(&self) -> KeyhavenResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Atomic unit of change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    /// Compare-and-set writes, applied together
    pub writes: Vec<ConditionalWrite>,
    /// Events appended when the writes apply
    pub events: Vec<PendingEvent>,
    /// Commit time in milliseconds, stamped on each event
    pub timestamp_ms: u64,
}

impl Transaction {
    /// Empty transaction stamped with `timestamp_ms`
    pub fn new(timestamp_ms: u64) -> Self {
        Self {
            writes: Vec::new(),
            events: Vec::new(),
            timestamp_ms,
        }
    }

    /// Add a write
    pub fn write(mut self, write: ConditionalWrite) -> Self {
        self.writes.push(write);
        self
    }

    /// Add an event
    pub fn event(mut self, event: PendingEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Add a write in place
    pub fn push_write(&mut self, write: ConditionalWrite) {
        self.writes.push(write);
    }

    /// Add an event in place
    pub fn push_event(&mut self, event: PendingEvent) {
        self.events.push(event);
    }

    /// Move every write and event of `other` into this transaction
    pub fn extend(&mut self, other: Transaction) {
        self.writes.extend(other.writes);
        self.events.extend(other.events);
    }
}

/// Outcome of a committed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// New version of each write, in write order
    pub versions: Vec<u64>,
    /// Sequence number of the last appended event, if any
    pub last_seq: Option<u64>,
}

/// Ledger failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum LedgerError {
    /// A compare-and-set expectation failed
    #[error("Version conflict on {key}: expected {expected:?}, found {actual:?}")]
    Conflict {
        /// Conflicting key
        key: String,
        /// Version the writer expected
        expected: Option<u64>,
        /// Version actually stored
        actual: Option<u64>,
    },
    /// A transaction wrote the same key twice
    #[error("Duplicate write to {key} in one transaction")]
    DuplicateWrite {
        /// Repeated key
        key: String,
    },
    /// Backend failure
    #[error("Ledger backend failure: {reason}")]
    Backend {
        /// Failure reason
        reason: String,
    },
}

impl From<LedgerError> for KeyhavenError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Conflict { .. } => KeyhavenError::conflict(err.to_string()),
            LedgerError::DuplicateWrite { .. } | LedgerError::Backend { .. } => {
                KeyhavenError::ledger(err.to_string())
            }
        }
    }
}

/// Versioned key-value store with atomic transactions and an append-only journal
#[async_trait]
pub trait LedgerEffects: Send + Sync {
    /// Read one record
    async fn read(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>, LedgerError>;

    /// Read every record whose key starts with `prefix`, ordered by key
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Versioned<Vec<u8>>)>, LedgerError>;

    /// Apply a transaction atomically
    async fn commit(&self, tx: Transaction) -> Result<CommitReceipt, LedgerError>;

    /// Journal entries with `seq > after`, in order
    async fn events_since(&self, after: u64) -> Result<Vec<LedgerEvent>, LedgerError>;
}

/// Blanket implementation for Arc<T> where T: LedgerEffects
#[async_trait]
impl<T: LedgerEffects + ?Sized> LedgerEffects for std::sync::Arc<T> {
    async fn read(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>, LedgerError> {
        (**self).read(key).await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Versioned<Vec<u8>>)>, LedgerError> {
        (**self).scan(prefix).await
    }

    async fn commit(&self, tx: Transaction) -> Result<CommitReceipt, LedgerError> {
        (**self).commit(tx).await
    }

    async fn events_since(&self, after: u64) -> Result<Vec<LedgerEvent>, LedgerError> {
        (**self).events_since(after).await
    }
}

/// Read and decode one record
pub async fn load_record<T, L>(ledger: &L, key: &str) -> KeyhavenResult<Option<Versioned<T>>>
where
    T: DeserializeOwned,
    L: LedgerEffects + ?Sized,
{
    match ledger.read(key).await? {
        Some(raw) => {
            let value = serde_json::from_slice(&raw.value).map_err(|e| {
                KeyhavenError::serialization(format!("record {key}: {e}"))
            })?;
            Ok(Some(Versioned {
                version: raw.version,
                value,
            }))
        }
        None => Ok(None),
    }
}

/// Read and decode every record under `prefix`, ordered by key
pub async fn load_records<T, L>(ledger: &L, prefix: &str) -> KeyhavenResult<Vec<Versioned<T>>>
where
    T: DeserializeOwned,
    L: LedgerEffects + ?Sized,
{
    ledger
        .scan(prefix)
        .await?
        .into_iter()
        .map(|(key, raw)| {
            let value = serde_json::from_slice(&raw.value)
                .map_err(|e| KeyhavenError::serialization(format!("record {key}: {e}")))?;
            Ok(Versioned {
                version: raw.version,
                value,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_concurrent_modification() {
        let err: KeyhavenError = LedgerError::Conflict {
            key: "k".into(),
            expected: Some(1),
            actual: Some(2),
        }
        .into();
        assert!(matches!(err, KeyhavenError::ConcurrentModification { .. }));
    }

    #[test]
    fn builders_serialize_json() {
        let tx = Transaction::new(5)
            .write(ConditionalWrite::insert("a", &42u32).unwrap())
            .event(PendingEvent::json("test", "a", &"hello").unwrap());
        assert_eq!(tx.writes[0].value, b"42");
        assert_eq!(tx.writes[0].expected_version, None);
        assert_eq!(tx.events[0].payload, b"\"hello\"");
        assert_eq!(tx.timestamp_ms, 5);
    }
}
