//! In-memory order ledger.
//!
//! Records live in a `Vec` in insertion order with a per-owner index of
//! positions. Both sit behind one `std::sync::RwLock`; every operation takes
//! the lock, copies what it needs, and releases it before returning, so the
//! lock is never held across an `.await`.

use order_pipeline_core::ledger::{LedgerError, LedgerFuture, OrderLedger};
use order_pipeline_core::order::OrderRecord;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<OrderRecord>,
    by_owner: HashMap<String, Vec<usize>>,
}

/// Process-local [`OrderLedger`]. Never fails; contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, record: OrderRecord) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let position = state.records.len();
        state
            .by_owner
            .entry(record.username.clone())
            .or_default()
            .push(position);
        state.records.push(record);
    }

    fn owned_by(&self, owner: &str) -> Vec<OrderRecord> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .by_owner
            .get(owner)
            .map(|positions| {
                positions
                    .iter()
                    .filter_map(|&i| state.records.get(i).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn snapshot(&self) -> Vec<OrderRecord> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .clone()
    }

    fn size(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }
}

impl OrderLedger for InMemoryLedger {
    fn append(&self, record: OrderRecord) -> LedgerFuture<'_, ()> {
        self.insert(record);
        Box::pin(async { Ok::<(), LedgerError>(()) })
    }

    fn list_by_owner<'a>(&'a self, owner: &'a str) -> LedgerFuture<'a, Vec<OrderRecord>> {
        let records = self.owned_by(owner);
        Box::pin(async move { Ok(records) })
    }

    fn list_all(&self) -> LedgerFuture<'_, Vec<OrderRecord>> {
        let records = self.snapshot();
        Box::pin(async move { Ok(records) })
    }

    fn count(&self) -> LedgerFuture<'_, usize> {
        let size = self.size();
        Box::pin(async move { Ok(size) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use order_pipeline_core::order::{OrderId, ProductRecord};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn record(id: usize, owner: &str, book: &str) -> OrderRecord {
        let product = ProductRecord {
            id: book.to_string(),
            title: format!("Title {book}"),
            author: format!("Author {book}"),
        };
        let placed_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        OrderRecord::from_product(OrderId::new(format!("ord_{id}")), &product, owner, placed_at)
    }

    #[tokio::test]
    async fn lists_by_owner_in_insertion_order() {
        let ledger = InMemoryLedger::new();
        ledger.append(record(1, "alice", "b1")).await.unwrap();
        ledger.append(record(2, "bob", "b2")).await.unwrap();
        ledger.append(record(3, "alice", "b3")).await.unwrap();

        let alice = ledger.list_by_owner("alice").await.unwrap();
        let ids: Vec<_> = alice.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ord_1", "ord_3"]);

        assert!(ledger.list_by_owner("carol").await.unwrap().is_empty());
        assert_eq!(ledger.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn duplicate_ids_are_kept() {
        let ledger = InMemoryLedger::new();
        ledger.append(record(1, "alice", "b1")).await.unwrap();
        ledger.append(record(1, "alice", "b1")).await.unwrap();

        assert_eq!(ledger.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_not_lost() {
        let ledger = Arc::new(InMemoryLedger::new());

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    let owner = if i % 2 == 0 { "alice" } else { "bob" };
                    ledger.append(record(i, owner, "b1")).await.unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ledger.count().await.unwrap(), 64);
        assert_eq!(ledger.list_by_owner("alice").await.unwrap().len(), 32);
    }

    proptest! {
        #[test]
        fn owner_listing_is_a_filter_of_all(
            owners in prop::collection::vec(prop::sample::select(vec!["alice", "bob", "carol"]), 0..40),
            probe in prop::sample::select(vec!["alice", "bob", "carol", "dave"]),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let ledger = InMemoryLedger::new();
                for (i, owner) in owners.iter().enumerate() {
                    ledger.append(record(i, owner, "b1")).await.unwrap();
                }

                let filtered: Vec<_> = ledger
                    .list_all()
                    .await
                    .unwrap()
                    .into_iter()
                    .filter(|r| r.username == probe)
                    .collect();
                let listed = ledger.list_by_owner(probe).await.unwrap();

                prop_assert_eq!(listed, filtered);
                Ok(())
            })?;
        }
    }
}
