use super::block::Block;
use super::reference::ReferenceResolver;
use super::state::TipState;
use super::validation::{validate_block_contents, validate_successor};
use crate::cache::BlockCache;
use crate::config::ChainConfig;
use crate::error::{ChainError, Result};
use crate::lock::{LockManager, ReadGuard, UpdateGuard, WriteGuard};
use crate::pending::PendingTransactions;
use crate::persistence::LedgerStore;
use crate::transaction::TransactionId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// The ledger's single entry point: the last-block pointer, the lock that
/// orders readers against the write path, and the query surface.
///
/// Construct one per node after the store is opened and pass it by
/// reference (usually inside an `Arc`) to every consumer.
///
/// Queries take the read lock themselves. Mutations take a [`WriteGuard`]
/// obtained from [`Blockchain::write_lock`] (or escalated from an update
/// guard), so a caller can make several changes in one exclusive section.
pub struct Blockchain {
    pub(super) store: LedgerStore,
    pub(super) lock: LockManager,
    pub(super) tip: TipState,
    pub(super) resolver: ReferenceResolver,
    pub(super) cache: BlockCache,
    pub(super) pending: PendingTransactions,
    closed: AtomicBool,
}

impl Blockchain {
    /// Wraps an opened store, picking up its highest block as the tip.
    pub fn open(store: LedgerStore, config: &ChainConfig) -> Result<Self> {
        let last = store.last_block()?;
        match &last {
            Some(block) => info!(
                "Ledger opened at height {} (block {})",
                block.height(),
                block.id
            ),
            None => info!("Ledger opened empty; waiting for genesis"),
        }

        let cache = BlockCache::new(config.block_cache_capacity);
        let tip = TipState::new(last);
        if let Some(block) = tip.last_block() {
            cache.insert_block(block);
        }

        Ok(Blockchain {
            store,
            lock: LockManager::new(),
            tip,
            resolver: ReferenceResolver::new(config.ec_confirmation_depth),
            cache,
            pending: PendingTransactions::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn pending(&self) -> &PendingTransactions {
        &self.pending
    }

    pub fn resolver(&self) -> ReferenceResolver {
        self.resolver
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock
    }

    pub fn read_lock(&self) -> ReadGuard<'_> {
        self.lock.read()
    }

    pub fn update_lock(&self) -> Result<UpdateGuard<'_>> {
        self.lock.update()
    }

    pub fn write_lock(&self) -> Result<WriteGuard<'_>> {
        self.lock.write()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Tip accessors
    // ------------------------------------------------------------------

    pub fn last_block(&self) -> Option<Arc<Block>> {
        let _guard = self.lock.read();
        self.tip.last_block()
    }

    /// Height of the last block; `None` before genesis.
    pub fn height(&self) -> Option<u64> {
        let _guard = self.lock.read();
        self.tip.height()
    }

    pub fn last_block_timestamp(&self) -> Option<i64> {
        let _guard = self.lock.read();
        self.tip.last_block_timestamp()
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    fn check_guard(&self, guard: &WriteGuard<'_>) -> Result<()> {
        if self.is_closed() {
            return Err(ChainError::StorageFailure("ledger is shut down".to_string()));
        }
        if !guard.guards(&self.lock) {
            return Err(ChainError::InvariantViolation(
                "write guard belongs to a different ledger".to_string(),
            ));
        }
        Ok(())
    }

    /// Appends `block` and makes it the tip.
    ///
    /// The block must extend the current tip by exactly one height (or be
    /// genesis on an empty ledger) and must not repeat a stored transaction.
    /// Block and transactions are committed together; on any failure the
    /// previous tip stays in place.
    pub fn set_last_block(&self, guard: &WriteGuard<'_>, block: Block) -> Result<Arc<Block>> {
        self.check_guard(guard)?;
        let tip = self.tip.last_block();

        let checked = validate_successor(tip.as_deref(), &block)
            .and_then(|_| validate_block_contents(&block))
            .and_then(|_| self.check_not_stored(&block));
        if let Err(e) = checked {
            warn!("Rejected block {} at height {}: {}", block.id, block.height(), e);
            return Err(e);
        }

        self.store.append_block(&block)?;

        let block = Arc::new(block);
        self.tip.replace(Some(Arc::clone(&block)));
        self.cache.insert_block(Arc::clone(&block));
        self.pending.remove_all(&block.transactions);
        info!(
            "New tip at height {}: block {} with {} transactions",
            block.height(),
            block.id,
            block.transactions.len()
        );
        Ok(block)
    }

    fn check_not_stored(&self, block: &Block) -> Result<()> {
        if self.store.has_block(block.id)? {
            return Err(ChainError::InvariantViolation(format!(
                "Block {} is already stored.",
                block.id
            )));
        }
        for tx in &block.transactions {
            if self.store.has_transaction(tx.id)? {
                return Err(ChainError::InvariantViolation(format!(
                    "Transaction {} is already in the chain.",
                    tx.id
                )));
            }
        }
        Ok(())
    }

    /// Removes every block above `height`, leaving the block at `height` as
    /// the tip. Returns the removed blocks highest first; their transactions
    /// go back to the pending set.
    pub fn pop_off_to(&self, guard: &WriteGuard<'_>, height: u64) -> Result<Vec<Block>> {
        self.check_guard(guard)?;
        let current = self.tip.height().ok_or_else(|| {
            ChainError::InvariantViolation("cannot pop blocks off an empty chain".to_string())
        })?;
        if height > current {
            return Err(ChainError::InvariantViolation(format!(
                "Cannot pop to height {} above the tip at {}.",
                height, current
            )));
        }
        if height == current {
            return Ok(Vec::new());
        }

        let new_tip = self
            .store
            .get_block_at_height(height)?
            .ok_or_else(|| ChainError::MissingBlock(format!("no block at height {}", height)))?;
        let popped = self.store.remove_blocks_above(height)?;
        self.tip.replace(Some(Arc::new(new_tip)));

        for block in &popped {
            self.cache.remove(&block.id);
            for tx in &block.transactions {
                self.pending.insert(tx.clone());
            }
        }
        info!(
            "Popped {} blocks; tip is back at height {}",
            popped.len(),
            height
        );
        Ok(popped)
    }

    /// Records the outcome of a phased transaction's poll at the current height.
    pub fn record_phasing_result(
        &self,
        guard: &WriteGuard<'_>,
        transaction_id: TransactionId,
        approved: bool,
    ) -> Result<()> {
        self.check_guard(guard)?;
        if !self.store.has_transaction(transaction_id)? {
            return Err(ChainError::MissingTransaction(format!(
                "no transaction {} to record a phasing result for",
                transaction_id
            )));
        }
        let height = self.tip.height().unwrap_or(0);
        self.store.record_phasing_result(transaction_id, approved, height)
    }

    /// Purges prunable payloads whose retention window ended before `now`.
    pub fn prune_expired(&self, guard: &WriteGuard<'_>, now: i64) -> Result<usize> {
        self.check_guard(guard)?;
        let purged = self.store.purge_expired_prunable(now)?;
        if purged > 0 {
            self.cache.clear();
            info!("Purged {} expired prunable payloads", purged);
        }
        Ok(purged)
    }

    /// Waits for in-flight locked sections, then closes the store. Later
    /// queries and writes fail with a storage error.
    pub fn shutdown(&self) -> Result<()> {
        let _guard = self.lock.write()?;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.store.close();
        self.cache.clear();
        info!("Ledger shut down at height {:?}", self.tip.height());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::StoreOptions;

    fn ledger() -> Blockchain {
        let store = LedgerStore::temporary(StoreOptions::default()).unwrap();
        Blockchain::open(store, &ChainConfig::default()).unwrap()
    }

    #[test]
    fn test_genesis_then_successor() {
        let chain = ledger();
        assert_eq!(chain.height(), None);

        let guard = chain.write_lock().unwrap();
        let genesis = chain.set_last_block(&guard, Block::genesis(0, 1, vec![])).unwrap();
        let next = chain.set_last_block(&guard, genesis.successor(10, 1, vec![])).unwrap();
        drop(guard);

        assert_eq!(chain.height(), Some(1));
        assert_eq!(chain.last_block().map(|b| b.id), Some(next.id));
        assert_eq!(chain.last_block_timestamp(), Some(10));
    }

    #[test]
    fn test_rejected_block_leaves_tip() {
        let chain = ledger();
        let guard = chain.write_lock().unwrap();
        let genesis = chain.set_last_block(&guard, Block::genesis(0, 1, vec![])).unwrap();

        let fork = Block::new(1, Some(genesis.id ^ 1), 10, 1, vec![]);
        let err = chain.set_last_block(&guard, fork).unwrap_err();
        assert!(matches!(err, ChainError::InvariantViolation(_)));
        assert_eq!(chain.tip.last_block_id(), Some(genesis.id));
    }

    #[test]
    fn test_foreign_guard_is_rejected() {
        let chain = ledger();
        let other = LockManager::new();
        let guard = other.write().unwrap();
        let err = chain
            .set_last_block(&guard, Block::genesis(0, 1, vec![]))
            .unwrap_err();
        assert!(matches!(err, ChainError::InvariantViolation(_)));
    }

    #[test]
    fn test_pop_off_to_restores_earlier_tip() {
        let chain = ledger();
        let guard = chain.write_lock().unwrap();
        let genesis = chain.set_last_block(&guard, Block::genesis(0, 1, vec![])).unwrap();
        let one = chain.set_last_block(&guard, genesis.successor(10, 1, vec![])).unwrap();
        let two = chain.set_last_block(&guard, one.successor(20, 1, vec![])).unwrap();

        let popped = chain.pop_off_to(&guard, 0).unwrap();
        assert_eq!(
            popped.iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![two.id, one.id]
        );
        assert_eq!(chain.tip.height(), Some(0));
        assert!(chain.pop_off_to(&guard, 0).unwrap().is_empty());
        assert!(chain.pop_off_to(&guard, 5).is_err());

        // The chain can grow again from the restored tip.
        chain.set_last_block(&guard, genesis.successor(11, 2, vec![])).unwrap();
        assert_eq!(chain.tip.height(), Some(1));
    }

    #[test]
    fn test_shutdown_refuses_writes() {
        let chain = ledger();
        chain.shutdown().unwrap();
        chain.shutdown().unwrap();
        let guard = chain.write_lock().unwrap();
        assert!(chain
            .set_last_block(&guard, Block::genesis(0, 1, vec![]))
            .is_err());
    }
}
