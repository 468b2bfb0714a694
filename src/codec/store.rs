//! Record store port used by codec persistence.
//!
//! `persist` hands the store a whole transaction; the store applies every
//! record or none, and an existing transaction for the same correlation id
//! is left untouched (get-or-create), which makes persistence idempotent
//! under at-least-once replay.

use crate::error::PersistenceError;
use crate::types::CorrelationId;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One record to write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: Value,
}

impl Record {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A batch of records keyed by correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub correlation_id: CorrelationId,
    pub records: Vec<Record>,
}

/// Result of applying a transaction.
#[derive(Debug, Clone, Copy)]
pub struct TxnReceipt {
    /// False when the correlation id already had a committed transaction.
    pub created: bool,
    /// Number of records now stored under the correlation id.
    pub record_count: usize,
}

/// Transactional store port.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Apply the transaction atomically. A correlation id that already has a
    /// committed transaction is a no-op reporting `created: false`.
    async fn apply(&self, txn: Transaction) -> Result<TxnReceipt, PersistenceError>;

    /// Records committed under a correlation id, empty if none.
    async fn records_for(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Vec<Record>, PersistenceError>;
}

/// In-memory adapter. Commits a transaction only after every record has been
/// staged, so an injected mid-transaction failure leaves no partial state.
#[derive(Default)]
pub struct InMemoryRecordStore {
    committed: Mutex<HashMap<CorrelationId, Vec<Record>>>,
    fail_after_records: Mutex<Option<usize>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply` fail after staging `n` records.
    pub fn fail_next_apply_after(&self, n: usize) {
        *self.fail_after_records.lock() = Some(n);
    }

    pub fn transaction_count(&self) -> usize {
        self.committed.lock().len()
    }

    pub fn total_records(&self) -> usize {
        self.committed.lock().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn apply(&self, txn: Transaction) -> Result<TxnReceipt, PersistenceError> {
        let mut committed = self.committed.lock();
        if let Some(existing) = committed.get(&txn.correlation_id) {
            return Ok(TxnReceipt {
                created: false,
                record_count: existing.len(),
            });
        }

        let fail_after = self.fail_after_records.lock().take();
        let mut staged = Vec::with_capacity(txn.records.len());
        for record in txn.records {
            if let Some(limit) = fail_after {
                if staged.len() >= limit {
                    // Nothing committed: staged records are dropped whole.
                    return Err(PersistenceError::Aborted(format!(
                        "simulated failure after {} record(s)",
                        staged.len()
                    )));
                }
            }
            staged.push(record);
        }

        let record_count = staged.len();
        committed.insert(txn.correlation_id, staged);
        Ok(TxnReceipt {
            created: true,
            record_count,
        })
    }

    async fn records_for(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Vec<Record>, PersistenceError> {
        Ok(self
            .committed
            .lock()
            .get(correlation_id)
            .cloned()
            .unwrap_or_default())
    }
}
