//! In-memory ledger handler
//!
//! Records live in a `BTreeMap` so prefix scans come back ordered by key. A commit
//! takes the write lock, checks every compare-and-set expectation, and only then
//! applies the writes and appends the events. Readers holding the read lock always see
//! a state between two whole transactions.

use async_trait::async_trait;
use keyhaven_core::{
    CommitReceipt, LedgerEffects, LedgerError, LedgerEvent, Transaction, Versioned,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct LedgerState {
    records: BTreeMap<String, Versioned<Vec<u8>>>,
    events: Vec<LedgerEvent>,
}

/// In-memory ledger with atomic compare-and-set transactions
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerHandler {
    state: Arc<RwLock<LedgerState>>,
}

impl MemoryLedgerHandler {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Number of journal entries
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }
}

#[async_trait]
impl LedgerEffects for MemoryLedgerHandler {
    async fn read(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>, LedgerError> {
        Ok(self.state.read().await.records.get(key).cloned())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Versioned<Vec<u8>>)>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn commit(&self, tx: Transaction) -> Result<CommitReceipt, LedgerError> {
        let mut state = self.state.write().await;

        let mut keys = HashSet::with_capacity(tx.writes.len());
        for write in &tx.writes {
            if !keys.insert(write.key.as_str()) {
                return Err(LedgerError::DuplicateWrite {
                    key: write.key.clone(),
                });
            }
            let actual = state.records.get(&write.key).map(|r| r.version);
            if actual != write.expected_version {
                tracing::debug!(
                    key = %write.key,
                    expected = ?write.expected_version,
                    actual = ?actual,
                    "ledger write conflict"
                );
                return Err(LedgerError::Conflict {
                    key: write.key.clone(),
                    expected: write.expected_version,
                    actual,
                });
            }
        }

        let mut versions = Vec::with_capacity(tx.writes.len());
        for write in tx.writes {
            let version = write.expected_version.map_or(1, |v| v + 1);
            versions.push(version);
            state.records.insert(
                write.key,
                Versioned {
                    version,
                    value: write.value,
                },
            );
        }

        let mut last_seq = None;
        for event in tx.events {
            let seq = state.events.len() as u64 + 1;
            state.events.push(LedgerEvent {
                seq,
                fact_type: event.fact_type,
                key: event.key,
                payload: event.payload,
                timestamp_ms: tx.timestamp_ms,
            });
            last_seq = Some(seq);
        }

        Ok(CommitReceipt { versions, last_seq })
    }

    async fn events_since(&self, after: u64) -> Result<Vec<LedgerEvent>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .skip(after as usize)
            .cloned()
            .collect())
    }
}
