//! Read side of the [`Blockchain`] facade.
//!
//! Every query runs under the read lock. Returned cursors fetch lazily but
//! read one storage snapshot, taken at their first fetch. Hold
//! [`Blockchain::read_lock`] across the iteration when the scan must also
//! agree with [`Blockchain::last_block`].

use super::block::{Block, BlockId};
use super::chain::Blockchain;
use super::reference::ReferenceBlock;
use crate::crypto::AccountId;
use crate::error::{ChainError, Result};
use crate::persistence::{Cursor, Page, PrunableView, SqlQuery, TransactionQuery};
use crate::transaction::{FullHash, Transaction, TransactionId};

impl Blockchain {
    fn present(&self, block: &Block) -> Block {
        let view: PrunableView = self.store.prunable_view(false, None);
        let mut block = block.clone();
        block.transactions = block.transactions.into_iter().map(|tx| view.apply(tx)).collect();
        block
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    pub fn get_block(&self, id: BlockId) -> Result<Option<Block>> {
        let _guard = self.lock.read();
        if let Some(block) = self.cache.get(&id) {
            return Ok(Some(self.present(&block)));
        }
        let block = self.store.get_block(id)?;
        if let Some(block) = &block {
            self.cache.insert_block(std::sync::Arc::new(block.clone()));
        }
        Ok(block)
    }

    /// Like [`get_block`](Self::get_block) but a miss is an error.
    pub fn require_block(&self, id: BlockId) -> Result<Block> {
        self.get_block(id)?
            .ok_or_else(|| ChainError::MissingBlock(format!("block {}", id)))
    }

    pub fn get_block_at_height(&self, height: u64) -> Result<Option<Block>> {
        let _guard = self.lock.read();
        self.store.get_block_at_height(height)
    }

    pub fn block_id_at_height(&self, height: u64) -> Result<BlockId> {
        let _guard = self.lock.read();
        self.store
            .block_id_at_height(height)?
            .ok_or_else(|| ChainError::MissingBlock(format!("no block at height {}", height)))
    }

    pub fn has_block(&self, id: BlockId) -> Result<bool> {
        let _guard = self.lock.read();
        if self.cache.get(&id).is_some() {
            return Ok(true);
        }
        self.store.has_block(id)
    }

    /// The last block stamped at or before `timestamp`.
    pub fn get_last_block_at(&self, timestamp: i64) -> Result<Option<Block>> {
        let _guard = self.lock.read();
        self.store.last_block_at(timestamp)
    }

    pub fn all_blocks(&self) -> Result<Cursor<Block>> {
        let _guard = self.lock.read();
        self.store.all_blocks()
    }

    /// Blocks with `from <= height < to`, most recent first.
    pub fn blocks_in_range(&self, from: u64, to: u64) -> Result<Cursor<Block>> {
        let _guard = self.lock.read();
        self.store.blocks_in_range(from, to)
    }

    pub fn blocks_by_generator(
        &self,
        account: AccountId,
        min_timestamp: i64,
        page: Page,
    ) -> Result<Cursor<Block>> {
        let _guard = self.lock.read();
        self.store.blocks_by_generator(account, min_timestamp, page)
    }

    pub fn block_count_by_generator(&self, account: AccountId) -> Result<u64> {
        let _guard = self.lock.read();
        self.store.block_count_by_generator(account)
    }

    pub fn blocks_by_query(&self, query: SqlQuery) -> Result<Cursor<Block>> {
        let _guard = self.lock.read();
        self.store.blocks_by_query(query)
    }

    pub fn block_ids_after(&self, block_id: BlockId, limit: usize) -> Result<Vec<BlockId>> {
        let _guard = self.lock.read();
        self.store.block_ids_after(block_id, limit)
    }

    pub fn blocks_after(&self, block_id: BlockId, limit: usize) -> Result<Vec<Block>> {
        let _guard = self.lock.read();
        self.store.blocks_after(block_id, limit)
    }

    /// Blocks after `block_id` whose ids match `candidates` position by
    /// position, stopping at the first mismatch. Used to find where a peer's
    /// chain diverges from ours.
    pub fn blocks_after_matching(
        &self,
        block_id: BlockId,
        candidates: &[BlockId],
    ) -> Result<Vec<Block>> {
        let _guard = self.lock.read();
        self.store.blocks_after_matching(block_id, candidates)
    }

    // ------------------------------------------------------------------
    // Reference blocks
    // ------------------------------------------------------------------

    /// The reference block a transaction created at `timestamp` must name.
    pub fn reference_block(&self, timestamp: i64) -> Result<ReferenceBlock> {
        let _guard = self.lock.read();
        self.resolver.resolve(&self.store, timestamp)
    }

    pub fn validate_reference(&self, tx: &Transaction) -> Result<()> {
        let _guard = self.lock.read();
        self.resolver.validate(&self.store, tx)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let _guard = self.lock.read();
        self.store.get_transaction(id)
    }

    pub fn require_transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.get_transaction(id)?
            .ok_or_else(|| ChainError::MissingTransaction(format!("transaction {}", id)))
    }

    pub fn get_transaction_by_full_hash(&self, full_hash: &FullHash) -> Result<Option<Transaction>> {
        let _guard = self.lock.read();
        self.store.get_transaction_by_full_hash(full_hash)
    }

    pub fn has_transaction(&self, id: TransactionId) -> Result<bool> {
        let _guard = self.lock.read();
        self.store.has_transaction(id)
    }

    pub fn has_transaction_by_full_hash(&self, full_hash: &FullHash) -> Result<bool> {
        let _guard = self.lock.read();
        self.store.has_transaction_by_full_hash(full_hash)
    }

    pub fn transaction_count(&self) -> Result<u64> {
        let _guard = self.lock.read();
        self.store.transaction_count()
    }

    /// Transactions of `(tx_type, subtype)` sent or received by `account`.
    pub fn transaction_count_for(&self, account: AccountId, tx_type: u8, subtype: u8) -> Result<u64> {
        let _guard = self.lock.read();
        self.store.transaction_count_for(account, tx_type, subtype)
    }

    pub fn all_transactions(&self) -> Result<Cursor<Transaction>> {
        let _guard = self.lock.read();
        self.store.all_transactions()
    }

    pub fn transactions(&self, query: &TransactionQuery) -> Result<Cursor<Transaction>> {
        let _guard = self.lock.read();
        self.store.transactions(query)
    }

    pub fn transactions_by_type(&self, tx_type: u8, subtype: u8, page: Page) -> Result<Cursor<Transaction>> {
        self.transactions(&TransactionQuery::new().kind(tx_type, subtype).page(page))
    }

    pub fn referencing_transactions(
        &self,
        transaction_id: TransactionId,
        page: Page,
    ) -> Result<Cursor<Transaction>> {
        let _guard = self.lock.read();
        self.store.referencing_transactions(transaction_id, page)
    }

    pub fn transactions_by_query(&self, query: SqlQuery) -> Result<Cursor<Transaction>> {
        let _guard = self.lock.read();
        self.store.transactions_by_query(query)
    }

    /// Pending transactions accepted by `filter`, in arrival order.
    pub fn expected_transactions<F>(&self, filter: F) -> Vec<Transaction>
    where
        F: Fn(&Transaction) -> bool,
    {
        self.pending.expected_transactions(filter)
    }
}
