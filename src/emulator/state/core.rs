//! `StateCore`: the single critical section guarding the Terminal State
//! Core, plus its dedicated persistence writer task.
//!
//! Grounded on the teacher's `DbPool` sharing pattern (`src/db/connection.rs`):
//! there, a pooled connection is cloned into every handler and contention is
//! resolved by the pool; here there is no pool to resolve it, so a single
//! `tokio::sync::Mutex<Store>` is the critical section itself, exactly as
//! described for "global mutable singleton" in the design notes this module
//! implements.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs_utf8::Dir;
use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use super::{
    errors::StateError,
    store::Store,
    types::{Batch, Identifier, NewIds, Transaction},
};

fn format_tran_no(n: u64) -> String { format!("{n:06}") }
fn format_reference_number(n: u64) -> String { format!("{n:012}") }
fn format_approval_code(n: u64) -> String { format!("{:06}", n % 1_000_000) }

/// The process-wide Terminal State Core actor.
pub struct StateCore {
    store: Mutex<Store>,
    persist_tx: mpsc::UnboundedSender<Store>,
}

impl StateCore {
    /// Load the persisted document at `data_file` if present, otherwise
    /// start a fresh store, and spawn the dedicated persistence writer task.
    ///
    /// # Errors
    /// Returns an error if the data file exists but cannot be parsed, or if
    /// its parent directory cannot be opened.
    pub fn load_or_init(data_file: &Utf8Path, flush_interval: Duration) -> anyhow::Result<Self> {
        let (dir, file_name) = open_parent_dir(data_file)?;

        let mut store = match dir.read_to_string(&file_name) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Store::new(),
            Err(err) => return Err(err.into()),
        };
        store.repair_invariants();

        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_persistence_writer(dir, file_name, persist_rx, flush_interval));

        Ok(Self { store: Mutex::new(store), persist_tx })
    }

    fn enqueue_snapshot(&self, store: &Store) {
        // An unbounded channel never blocks the critical section; a send
        // failure only happens if the writer task has already exited.
        if self.persist_tx.send(store.clone()).is_err() {
            warn!("persistence writer task is no longer running; snapshot dropped");
        }
    }

    /// Atomically allocate a fresh `(tranNo, referenceNumber, responseId,
    /// approvalCode)` tuple without recording a transaction.
    pub async fn new_ids(&self) -> NewIds {
        let mut store = self.store.lock().await;
        let tran_no = store.counters.next_tran_no;
        let reference_number = store.counters.next_ref_no;
        let response_id = store.counters.next_response_id;
        store.counters.next_tran_no += 1;
        store.counters.next_ref_no += 1;
        store.counters.next_response_id += 1;
        NewIds {
            tran_no: format_tran_no(tran_no),
            reference_number: format_reference_number(reference_number),
            response_id: response_id.to_string(),
            approval_code: format_approval_code(reference_number),
        }
    }

    /// Bind `tx` to the currently open batch, stamp its timestamps, update
    /// statistics, persist, and return the stored record.
    pub async fn add_transaction(&self, mut tx: Transaction) -> Transaction {
        let mut store = self.store.lock().await;
        let now = Utc::now();
        tx.batch_id = store.current_batch.id.clone();
        tx.created_at = now;
        tx.updated_at = now;
        store.current_batch.transactions.push(tx.id.clone());
        update_statistics(&mut store, &tx.amounts.total_amount);
        store.transactions.push(tx.clone());
        self.enqueue_snapshot(&store);
        tx
    }

    /// Look up a transaction by `identifier`, apply `patch`, stamp
    /// `updatedAt`, persist, and return the updated record.
    ///
    /// # Errors
    /// Returns [`StateError::TransactionNotFound`] if no transaction matches.
    pub async fn update(
        &self,
        identifier: &Identifier,
        patch: impl FnOnce(&mut Transaction),
    ) -> Result<Transaction, StateError> {
        let mut store = self.store.lock().await;
        let index = store
            .transactions
            .iter()
            .position(|t| identifier.matches(t))
            .ok_or(StateError::TransactionNotFound)?;
        let slot = store
            .transactions
            .get_mut(index)
            .ok_or(StateError::TransactionNotFound)?;
        patch(slot);
        slot.updated_at = Utc::now();
        let updated = slot.clone();
        self.enqueue_snapshot(&store);
        Ok(updated)
    }

    /// Look up a transaction by `identifier` without mutating it.
    pub async fn find(&self, identifier: &Identifier) -> Option<Transaction> {
        let store = self.store.lock().await;
        store.transactions.iter().find(|t| identifier.matches(t)).cloned()
    }

    /// List every settlement-eligible transaction in the open batch.
    pub async fn unsettled(&self) -> Vec<Transaction> {
        let store = self.store.lock().await;
        store
            .transactions
            .iter()
            .filter(|t| t.batch_id == store.current_batch.id && t.status.is_settlement_eligible())
            .cloned()
            .collect()
    }

    /// List every transaction recorded so far, most recent first.
    pub async fn list_transactions(&self) -> Vec<Transaction> {
        let store = self.store.lock().await;
        let mut all = store.transactions.clone();
        all.reverse();
        all
    }

    /// The currently open batch.
    pub async fn current_batch(&self) -> Batch {
        let store = self.store.lock().await;
        store.current_batch.clone()
    }

    /// Settle every eligible transaction in the open batch, close it, and
    /// open a fresh one. Returns the now-closed batch.
    pub async fn close_batch(&self) -> Batch {
        use super::types::TransactionStatus;

        let mut store = self.store.lock().await;
        let open_id = store.current_batch.id.clone();
        let mut settled_count = 0_u32;
        let mut total = rust_decimal::Decimal::ZERO;

        for tx in &mut store.transactions {
            if tx.batch_id == open_id && tx.status.is_settlement_eligible() {
                tx.status = TransactionStatus::Settled;
                tx.updated_at = Utc::now();
                settled_count += 1;
                if let Ok(amount) = crate::amount::parse(&tx.amounts.total_amount) {
                    total += amount;
                }
            }
        }

        let mut closed = store.current_batch.clone();
        closed.close_time = Some(Utc::now());
        closed.is_open = false;
        closed.settlement_count = Some(settled_count);
        closed.total_amount = Some(crate::amount::format_two_fractional(total));

        let next_batch_no = store.counters.next_batch_no;
        store.counters.next_batch_no += 1;
        store.current_batch = Batch {
            id: format!("B{next_batch_no:04}"),
            open_time: Utc::now(),
            close_time: None,
            is_open: true,
            transactions: Vec::new(),
            settlement_count: None,
            total_amount: None,
        };
        store.batches.push(closed.clone());
        self.enqueue_snapshot(&store);
        closed
    }
}

fn update_statistics(store: &mut Store, total_amount: &str) {
    store.statistics.daily_count += 1;
    store.statistics.global_count += 1;
    store.statistics.daily_total =
        crate::amount::add(&store.statistics.daily_total, total_amount).unwrap_or_else(|_| {
            store.statistics.daily_total.clone()
        });
    store.statistics.global_total =
        crate::amount::add(&store.statistics.global_total, total_amount).unwrap_or_else(|_| {
            store.statistics.global_total.clone()
        });
}

fn open_parent_dir(data_file: &Utf8Path) -> anyhow::Result<(Dir, Utf8PathBuf)> {
    let parent = data_file.parent().filter(|p| !p.as_str().is_empty()).unwrap_or(Utf8Path::new("."));
    let file_name = data_file
        .file_name()
        .map(Utf8PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("data file path has no file name: {data_file}"))?;
    std::fs::create_dir_all(parent)?;
    let dir = Dir::open_ambient_dir(parent, cap_std::ambient_authority())?;
    Ok((dir, file_name))
}

async fn run_persistence_writer(
    dir: Dir,
    file_name: Utf8PathBuf,
    mut rx: mpsc::UnboundedReceiver<Store>,
    flush_interval: Duration,
) {
    let mut latest: Option<Store> = None;
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(store) = received else { break };
                if let Err(err) = write_snapshot(&dir, &file_name, &store) {
                    warn!(%err, "failed to persist transaction store");
                }
                latest = Some(store);
            }
            _ = ticker.tick() => {
                if let Some(store) = &latest {
                    if let Err(err) = write_snapshot(&dir, &file_name, store) {
                        warn!(%err, "failed to flush transaction store");
                    }
                }
            }
        }
    }
}

fn write_snapshot(dir: &Dir, file_name: &Utf8Path, store: &Store) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(store)?;
    let tmp_name = format!("{file_name}.tmp");
    {
        use std::io::Write;
        let mut file = dir.create(&tmp_name)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    dir.rename(&tmp_name, dir, file_name)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use camino::Utf8PathBuf;
    use tempfile::tempdir;

    use super::*;
    use crate::emulator::state::types::{Amounts, CardAcquisition, TransactionKind, TransactionStatus};

    fn sample_transaction(total_amount: &str) -> Transaction {
        Transaction {
            id: "placeholder".to_owned(),
            tran_no: "000000".to_owned(),
            reference_number: "000000000000".to_owned(),
            response_id: "0".to_owned(),
            approval_code: Some("000000".to_owned()),
            kind: TransactionKind::Sale,
            status: TransactionStatus::Approved,
            amounts: Amounts {
                base_amount: Some(total_amount.to_owned()),
                total_amount: total_amount.to_owned(),
                ..Default::default()
            },
            card_acquisition: Some(CardAcquisition::Manual),
            card_type: Some("VISA".to_owned()),
            masked_pan: Some("411111******1111".to_owned()),
            batch_id: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            original_transaction: None,
            decline_reason: None,
            balance_due: None,
            partial: false,
        }
    }

    async fn core(dir: &tempfile::TempDir) -> StateCore {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("store.json")).expect("utf8 path");
        StateCore::load_or_init(&path, Duration::from_secs(30)).expect("load")
    }

    #[tokio::test]
    async fn new_ids_are_unique_and_monotonic() {
        let dir = tempdir().expect("tempdir");
        let state = core(&dir).await;
        let first = state.new_ids().await;
        let second = state.new_ids().await;
        assert_ne!(first.tran_no, second.tran_no);
        assert_ne!(first.reference_number, second.reference_number);
        assert_ne!(first.response_id, second.response_id);
    }

    #[tokio::test]
    async fn add_find_and_update_round_trip() {
        let dir = tempdir().expect("tempdir");
        let state = core(&dir).await;
        let ids = state.new_ids().await;
        let mut tx = sample_transaction("10.00");
        tx.id = "tx-1".to_owned();
        tx.tran_no = ids.tran_no.clone();
        tx.reference_number = ids.reference_number.clone();
        tx.response_id = ids.response_id.clone();
        let stored = state.add_transaction(tx).await;
        assert!(!stored.batch_id.is_empty());

        let found = state
            .find(&Identifier::TranNo(ids.tran_no.clone()))
            .await
            .expect("found");
        assert_eq!(found.id, "tx-1");

        let updated = state
            .update(&Identifier::Id("tx-1".to_owned()), |t| {
                t.status = TransactionStatus::Voided;
            })
            .await
            .expect("update");
        assert_eq!(updated.status, TransactionStatus::Voided);
    }

    #[tokio::test]
    async fn close_batch_settles_and_sums_amounts() {
        let dir = tempdir().expect("tempdir");
        let state = core(&dir).await;

        for (id, amount) in [("a", "10.00"), ("b", "20.00")] {
            let mut tx = sample_transaction(amount);
            tx.id = id.to_owned();
            state.add_transaction(tx).await;
        }

        let closed = state.close_batch().await;
        assert_eq!(closed.settlement_count, Some(2));
        assert_eq!(closed.total_amount.as_deref(), Some("30.00"));
        assert!(state.unsettled().await.is_empty());
    }

    #[tokio::test]
    async fn persists_and_reloads_from_disk() {
        let dir = tempdir().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("store.json")).expect("utf8 path");
        let state = StateCore::load_or_init(&path, Duration::from_millis(20)).expect("load");
        let mut tx = sample_transaction("15.00");
        tx.id = "tx-reload".to_owned();
        state.add_transaction(tx).await;

        // Give the writer task a chance to drain the queued snapshot.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let reloaded = StateCore::load_or_init(&path, Duration::from_secs(30)).expect("reload");
        let found = reloaded.find(&Identifier::Id("tx-reload".to_owned())).await;
        assert!(found.is_some());
    }
}
