//! The persisted document shape and its pure (non-locking) mutation helpers.
//!
//! Everything in this module runs inside the single critical section held by
//! [`super::core::StateCore`]; none of it is `async` or does its own
//! locking, mirroring how the teacher's `db/*.rs` query helpers are plain
//! functions invoked while holding a pooled connection.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::types::{Batch, Counters, Statistics, Transaction};

/// The full persisted document: transactions, batch history, counters, the
/// currently open batch, and running statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    /// Every transaction ever recorded, open or settled.
    pub transactions: Vec<Transaction>,
    /// Closed batches, oldest first.
    pub batches: Vec<Batch>,
    /// Monotonic ID counters.
    pub counters: Counters,
    /// The currently open batch.
    #[serde(rename = "currentBatch")]
    pub current_batch: Batch,
    /// Running statistics.
    pub statistics: Statistics,
}

fn batch_id(n: u64) -> String { format!("B{n:04}") }

impl Store {
    /// Build a fresh, empty store with batch `B0001` open.
    #[must_use]
    pub fn new() -> Self {
        let counters = Counters::default();
        let now = Utc::now();
        Self {
            transactions: Vec::new(),
            batches: Vec::new(),
            current_batch: Batch {
                id: batch_id(counters.next_batch_no),
                open_time: now,
                close_time: None,
                is_open: true,
                transactions: Vec::new(),
                settlement_count: None,
                total_amount: None,
            },
            counters: Counters {
                next_batch_no: counters.next_batch_no + 1,
                ..counters
            },
            statistics: Statistics::default(),
        }
    }

    /// Re-derive counters and the open-batch invariant after loading a
    /// possibly stale or hand-edited document, so a persisted file can never
    /// regress allocation below what it already recorded.
    pub fn repair_invariants(&mut self) {
        let max_tran_no = self
            .transactions
            .iter()
            .filter_map(|t| t.tran_no.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        let max_ref_no = self
            .transactions
            .iter()
            .filter_map(|t| t.reference_number.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        let max_response_id = self
            .transactions
            .iter()
            .filter_map(|t| t.response_id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        let max_batch_no = self
            .batches
            .iter()
            .chain(std::iter::once(&self.current_batch))
            .filter_map(|b| b.id.strip_prefix('B').and_then(|n| n.parse::<u64>().ok()))
            .max()
            .unwrap_or(0);

        self.counters.next_tran_no = self.counters.next_tran_no.max(max_tran_no + 1);
        self.counters.next_ref_no = self.counters.next_ref_no.max(max_ref_no + 1);
        self.counters.next_response_id = self.counters.next_response_id.max(max_response_id + 1);
        self.counters.next_batch_no = self.counters.next_batch_no.max(max_batch_no + 1);

        if !self.current_batch.is_open {
            self.current_batch = Batch {
                id: batch_id(self.counters.next_batch_no),
                open_time: Utc::now(),
                close_time: None,
                is_open: true,
                transactions: Vec::new(),
                settlement_count: None,
                total_amount: None,
            };
            self.counters.next_batch_no += 1;
        }
    }
}

impl Default for Store {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_store_opens_first_batch() {
        let store = Store::new();
        assert_eq!(store.current_batch.id, "B0001");
        assert!(store.current_batch.is_open);
        assert_eq!(store.counters.next_batch_no, 2);
    }

    #[test]
    fn repair_invariants_raises_counters_past_existing_data() {
        let mut store = Store::new();
        store.counters.next_tran_no = 1;
        store.transactions.push(Transaction {
            id: "x".to_owned(),
            tran_no: "000050".to_owned(),
            reference_number: "200000000099".to_owned(),
            response_id: "42".to_owned(),
            approval_code: None,
            kind: super::super::types::TransactionKind::Sale,
            status: super::super::types::TransactionStatus::Approved,
            amounts: super::super::types::Amounts {
                total_amount: "10.00".to_owned(),
                ..Default::default()
            },
            card_acquisition: None,
            card_type: None,
            masked_pan: None,
            batch_id: store.current_batch.id.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            original_transaction: None,
            decline_reason: None,
            balance_due: None,
            partial: false,
        });
        store.repair_invariants();
        assert_eq!(store.counters.next_tran_no, 51);
        assert_eq!(store.counters.next_ref_no, 200_000_000_100);
        assert_eq!(store.counters.next_response_id, 43);
    }
}
