//! Expected transactions: known to the node but not in the canonical chain.
//!
//! Holds broadcast and phased transactions awaiting inclusion, plus the
//! transactions of blocks popped off during a fork switch. Entries come out
//! in arrival order.

use crate::transaction::{Transaction, TransactionId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Default)]
struct PendingSet {
    by_id: HashMap<TransactionId, u64>,
    by_arrival: BTreeMap<u64, Transaction>,
    next_seq: u64,
}

#[derive(Debug, Default)]
pub struct PendingTransactions {
    inner: RwLock<PendingSet>,
}

impl PendingTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `tx`, dropping any block placement it carried. Returns false if
    /// a transaction with the same id is already pending.
    pub fn insert(&self, mut tx: Transaction) -> bool {
        tx.placement = None;
        let mut set = self.inner.write();
        if set.by_id.contains_key(&tx.id) {
            return false;
        }
        let seq = set.next_seq;
        set.next_seq += 1;
        set.by_id.insert(tx.id, seq);
        set.by_arrival.insert(seq, tx);
        true
    }

    pub fn remove(&self, id: TransactionId) -> Option<Transaction> {
        let mut set = self.inner.write();
        let seq = set.by_id.remove(&id)?;
        set.by_arrival.remove(&seq)
    }

    /// Drops every transaction `block_transactions` names; used once they are
    /// persisted.
    pub fn remove_all<'a>(&self, block_transactions: impl IntoIterator<Item = &'a Transaction>) {
        let mut set = self.inner.write();
        let mut removed = 0usize;
        for tx in block_transactions {
            if let Some(seq) = set.by_id.remove(&tx.id) {
                set.by_arrival.remove(&seq);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Removed {} included transactions from the pending set", removed);
        }
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.inner.read().by_id.contains_key(&id)
    }

    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        let set = self.inner.read();
        let seq = set.by_id.get(&id)?;
        set.by_arrival.get(seq).cloned()
    }

    /// Pending transactions accepted by `filter`, in arrival order.
    pub fn expected_transactions<F>(&self, filter: F) -> Vec<Transaction>
    where
        F: Fn(&Transaction) -> bool,
    {
        self.inner
            .read()
            .by_arrival
            .values()
            .filter(|tx| filter(tx))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut set = self.inner.write();
        set.by_id.clear();
        set.by_arrival.clear();
    }
}
