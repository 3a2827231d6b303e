use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;

/// One completed coordinator write
///
/// Lives only in the in-memory log; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteTransaction {
    pub transaction_id: String,
    pub target_path: PathBuf,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
    pub backup_path: Option<PathBuf>,
}

/// Bounded ring of recent transactions, oldest evicted first
#[derive(Debug)]
pub(crate) struct TransactionLog {
    capacity: usize,
    entries: VecDeque<WriteTransaction>,
}

impl TransactionLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, tx: WriteTransaction) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(tx);
    }

    pub(crate) fn snapshot(&self) -> Vec<WriteTransaction> {
        self.entries.iter().cloned().collect()
    }
}
