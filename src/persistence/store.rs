//! Durable block and transaction tables.
//!
//! Reads go through pooled read-only connections; the single writer
//! connection is reserved for the write path driven by the blockchain
//! facade under its write lock.

use super::cursor::{Cursor, Finisher};
use super::pool::{ConnectionPool, PooledConnection};
use super::query::{Page, SqlQuery, TransactionQuery};
use super::rows::{
    block_from_row, insert_block, load_block_transactions, transaction_from_row, PrunableView,
    BLOCK_COLUMNS, TRANSACTION_COLUMNS,
};
use crate::blockchain::{Block, BlockId};
use crate::config::LedgerConfig;
use crate::crypto::AccountId;
use crate::error::{ChainError, Result};
use crate::transaction::{FullHash, Transaction, TransactionId};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub reader_pool_size: usize,
    pub page_size: u32,
    pub prunable_retention_secs: i64,
}

impl StoreOptions {
    pub fn from_config(config: &LedgerConfig) -> Self {
        StoreOptions {
            reader_pool_size: config.database.reader_pool_size,
            page_size: config.chain.default_page_size,
            prunable_retention_secs: config.chain.prunable_retention_secs,
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions::from_config(&LedgerConfig::default())
    }
}

pub struct LedgerStore {
    writer: Mutex<Connection>,
    readers: Arc<ConnectionPool>,
    options: StoreOptions,
    path: PathBuf,
    // Keeps a temporary database alive for as long as the store.
    _temp_dir: Option<TempDir>,
}

impl LedgerStore {
    /// Opens or creates the ledger database at `path`.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        Self::open_inner(path.as_ref().to_path_buf(), options, None)
    }

    /// A store backed by a throwaway directory, removed when the store drops.
    pub fn temporary(options: StoreOptions) -> Result<Self> {
        let dir = TempDir::new()?;
        let path = dir.path().join("ledger.db");
        Self::open_inner(path, options, Some(dir))
    }

    fn open_inner(path: PathBuf, options: StoreOptions, temp_dir: Option<TempDir>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)
            .map_err(|e| ChainError::StorageFailure(format!("Failed to open database: {}", e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| ChainError::StorageFailure(format!("Failed to create schema: {}", e)))?;
        info!("Opened ledger database at {}", path.display());

        Ok(LedgerStore {
            writer: Mutex::new(conn),
            readers: ConnectionPool::new(path.clone(), options.reader_pool_size),
            options,
            path,
            _temp_dir: temp_dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Reader connections currently held by cursors or lookups.
    pub fn readers_in_use(&self) -> usize {
        self.readers.in_use()
    }

    pub(crate) fn close(&self) {
        self.readers.close();
        debug!("Closed reader pool for {}", self.path.display());
    }

    fn reader(&self) -> Result<PooledConnection> {
        self.readers.acquire()
    }

    pub(crate) fn prunable_view(&self, include_expired: bool, as_of: Option<i64>) -> PrunableView {
        PrunableView {
            now: as_of.unwrap_or_else(|| chrono::Utc::now().timestamp()),
            retention_secs: self.options.prunable_retention_secs,
            include_expired,
        }
    }

    fn block_cursor(&self, query: SqlQuery) -> Result<Cursor<Block>> {
        let view = self.prunable_view(false, None);
        let finish: Finisher<Block> = Box::new(move |conn: &Connection, mut block: Block| -> Result<Block> {
            load_block_transactions(conn, &mut block, view)?;
            Ok(block)
        });
        Ok(Cursor::new(self.reader()?, query, block_from_row, self.options.page_size)
            .with_finisher(finish))
    }

    fn transaction_cursor(&self, query: SqlQuery, view: PrunableView) -> Result<Cursor<Transaction>> {
        let finish: Finisher<Transaction> = Box::new(move |_: &Connection, tx: Transaction| -> Result<Transaction> {
            Ok(view.apply(tx))
        });
        Ok(Cursor::new(self.reader()?, query, transaction_from_row, self.options.page_size)
            .with_finisher(finish))
    }

    fn query_block(&self, where_clause: &str, params: &[&dyn ToSql]) -> Result<Option<Block>> {
        let conn = self.reader()?;
        let sql = format!("SELECT {} FROM block WHERE {}", BLOCK_COLUMNS, where_clause);
        let block = conn
            .prepare_cached(&sql)?
            .query_row(params, block_from_row)
            .optional()?;
        match block {
            Some(mut block) => {
                load_block_transactions(&conn, &mut block, self.prunable_view(false, None))?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    fn query_transaction(&self, where_clause: &str, param: &dyn ToSql) -> Result<Option<Transaction>> {
        let conn = self.reader()?;
        let sql = format!("SELECT {} FROM tx WHERE {}", TRANSACTION_COLUMNS, where_clause);
        let tx = conn
            .prepare_cached(&sql)?
            .query_row([param], transaction_from_row)
            .optional()?;
        let view = self.prunable_view(false, None);
        Ok(tx.map(|tx| view.apply(tx)))
    }

    fn exists(&self, sql: &str, param: &dyn ToSql) -> Result<bool> {
        let conn = self.reader()?;
        let found = conn
            .prepare_cached(sql)?
            .query_row([param], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn count(&self, sql: &str, params: &[&dyn ToSql]) -> Result<u64> {
        let conn = self.reader()?;
        let count: i64 = conn.prepare_cached(sql)?.query_row(params, |row| row.get(0))?;
        Ok(count as u64)
    }

    // ------------------------------------------------------------------
    // Point lookups
    // ------------------------------------------------------------------

    pub fn get_block(&self, id: BlockId) -> Result<Option<Block>> {
        self.query_block("id = ?1", &[&(id as i64)])
    }

    pub fn get_block_at_height(&self, height: u64) -> Result<Option<Block>> {
        self.query_block("height = ?1", &[&(height as i64)])
    }

    /// The block with the greatest height, if any.
    pub fn last_block(&self) -> Result<Option<Block>> {
        self.query_block("height = (SELECT MAX(height) FROM block)", &[])
    }

    /// The last block whose timestamp is at or before `timestamp`.
    pub fn last_block_at(&self, timestamp: i64) -> Result<Option<Block>> {
        self.query_block(
            "height = (SELECT MAX(height) FROM block WHERE timestamp <= ?1)",
            &[&timestamp],
        )
    }

    pub fn block_id_at_height(&self, height: u64) -> Result<Option<BlockId>> {
        let conn = self.reader()?;
        let id: Option<i64> = conn
            .prepare_cached("SELECT id FROM block WHERE height = ?1")?
            .query_row(params![height as i64], |row| row.get(0))
            .optional()?;
        Ok(id.map(|id| id as u64))
    }

    pub fn has_block(&self, id: BlockId) -> Result<bool> {
        self.exists("SELECT 1 FROM block WHERE id = ?1", &(id as i64))
    }

    pub fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.query_transaction("id = ?1", &(id as i64))
    }

    pub fn get_transaction_by_full_hash(&self, full_hash: &FullHash) -> Result<Option<Transaction>> {
        self.query_transaction("full_hash = ?1", &full_hash.to_vec())
    }

    pub fn has_transaction(&self, id: TransactionId) -> Result<bool> {
        self.exists("SELECT 1 FROM tx WHERE id = ?1", &(id as i64))
    }

    pub fn has_transaction_by_full_hash(&self, full_hash: &FullHash) -> Result<bool> {
        self.exists("SELECT 1 FROM tx WHERE full_hash = ?1", &full_hash.to_vec())
    }

    // ------------------------------------------------------------------
    // Block scans
    // ------------------------------------------------------------------

    /// Every block in chain order, genesis first.
    pub fn all_blocks(&self) -> Result<Cursor<Block>> {
        let sql = format!("SELECT {} FROM block ORDER BY height ASC", BLOCK_COLUMNS);
        self.block_cursor(SqlQuery::new(sql))
    }

    /// Blocks with `from <= height < to`, most recent first.
    pub fn blocks_in_range(&self, from: u64, to: u64) -> Result<Cursor<Block>> {
        let sql = format!(
            "SELECT {} FROM block WHERE height >= ? AND height < ? ORDER BY height DESC",
            BLOCK_COLUMNS
        );
        self.block_cursor(SqlQuery::new(sql).bind(from as i64).bind(to as i64))
    }

    /// Blocks generated by `account` at or after `min_timestamp`, most recent first.
    pub fn blocks_by_generator(
        &self,
        account: AccountId,
        min_timestamp: i64,
        page: Page,
    ) -> Result<Cursor<Block>> {
        let sql = format!(
            "SELECT {} FROM block WHERE generator_id = ? AND timestamp >= ? ORDER BY height DESC",
            BLOCK_COLUMNS
        );
        self.block_cursor(
            SqlQuery::new(sql)
                .bind(account as i64)
                .bind(min_timestamp)
                .page(page),
        )
    }

    pub fn block_count_by_generator(&self, account: AccountId) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM block WHERE generator_id = ?1",
            &[&(account as i64)],
        )
    }

    /// Streams blocks for a caller-supplied query selecting [`BLOCK_COLUMNS`].
    pub fn blocks_by_query(&self, query: SqlQuery) -> Result<Cursor<Block>> {
        self.block_cursor(query)
    }

    // ------------------------------------------------------------------
    // Chain traversal
    // ------------------------------------------------------------------

    fn blocks_after_rows(&self, block_id: BlockId, limit: usize) -> Result<Vec<Block>> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {} FROM block WHERE height > (SELECT height FROM block WHERE id = ?1)
             ORDER BY height ASC LIMIT ?2",
            BLOCK_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let blocks = stmt
            .query_map(params![block_id as i64, limit as i64], block_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let view = self.prunable_view(false, None);
        blocks
            .into_iter()
            .map(|mut block| {
                load_block_transactions(&conn, &mut block, view)?;
                Ok(block)
            })
            .collect()
    }

    /// Ids of up to `limit` blocks following `block_id`, in chain order.
    /// Unknown `block_id` yields nothing.
    pub fn block_ids_after(&self, block_id: BlockId, limit: usize) -> Result<Vec<BlockId>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id FROM block WHERE height > (SELECT height FROM block WHERE id = ?1)
             ORDER BY height ASC LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![block_id as i64, limit as i64], |row| row.get::<_, i64>(0))?
            .map(|id| id.map(|id| id as u64))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn blocks_after(&self, block_id: BlockId, limit: usize) -> Result<Vec<Block>> {
        self.blocks_after_rows(block_id, limit)
    }

    /// The longest prefix of `candidates` that matches the chain right after
    /// `block_id`, as full blocks.
    pub fn blocks_after_matching(
        &self,
        block_id: BlockId,
        candidates: &[BlockId],
    ) -> Result<Vec<Block>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let blocks = self.blocks_after_rows(block_id, candidates.len())?;
        Ok(blocks
            .into_iter()
            .zip(candidates)
            .take_while(|(block, candidate)| block.id == **candidate)
            .map(|(block, _)| block)
            .collect())
    }

    // ------------------------------------------------------------------
    // Transaction scans
    // ------------------------------------------------------------------

    pub fn transactions(&self, query: &TransactionQuery) -> Result<Cursor<Transaction>> {
        let view = self.prunable_view(query.include_expired_prunable, query.as_of);
        self.transaction_cursor(query.to_sql(), view)
    }

    /// Every transaction in chain order.
    pub fn all_transactions(&self) -> Result<Cursor<Transaction>> {
        let sql = format!(
            "SELECT {} FROM tx ORDER BY height ASC, transaction_index ASC",
            TRANSACTION_COLUMNS
        );
        self.transaction_cursor(SqlQuery::new(sql), self.prunable_view(false, None))
    }

    /// Transactions naming `transaction_id` as their reference dependency.
    pub fn referencing_transactions(
        &self,
        transaction_id: TransactionId,
        page: Page,
    ) -> Result<Cursor<Transaction>> {
        let sql = format!(
            "SELECT {} FROM tx WHERE referenced_transaction_id = ?
             ORDER BY height DESC, transaction_index ASC",
            TRANSACTION_COLUMNS
        );
        let query = SqlQuery::new(sql).bind(transaction_id as i64).page(page);
        self.transaction_cursor(query, self.prunable_view(false, None))
    }

    /// Streams transactions for a caller-supplied query selecting [`TRANSACTION_COLUMNS`].
    pub fn transactions_by_query(&self, query: SqlQuery) -> Result<Cursor<Transaction>> {
        self.transaction_cursor(query, self.prunable_view(false, None))
    }

    pub fn transaction_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM tx", &[])
    }

    pub fn transaction_count_for(&self, account: AccountId, tx_type: u8, subtype: u8) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM tx WHERE (sender_id = ?1 OR recipient_id = ?1)
             AND type = ?2 AND subtype = ?3",
            &[&(account as i64), &tx_type, &subtype],
        )
    }

    // ------------------------------------------------------------------
    // Write path (driven by the blockchain facade under its write lock)
    // ------------------------------------------------------------------

    /// Inserts `block` and its transactions in one database transaction.
    pub(crate) fn append_block(&self, block: &Block) -> Result<()> {
        let mut conn = self.writer.lock();
        let sql_tx = conn.transaction()?;
        insert_block(&sql_tx, block)?;
        sql_tx.commit()?;
        debug!(
            "Stored block {} at height {} with {} transactions",
            block.id,
            block.height(),
            block.transactions.len()
        );
        Ok(())
    }

    /// Removes every block above `height` with its transactions and phasing
    /// results, returning the removed blocks highest first.
    pub(crate) fn remove_blocks_above(&self, height: u64) -> Result<Vec<Block>> {
        let mut conn = self.writer.lock();
        let sql_tx = conn.transaction()?;

        let sql = format!(
            "SELECT {} FROM block WHERE height > ?1 ORDER BY height DESC",
            BLOCK_COLUMNS
        );
        let mut blocks = {
            let mut stmt = sql_tx.prepare(&sql)?;
            let rows = stmt.query_map(params![height as i64], block_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for block in blocks.iter_mut() {
            load_block_transactions(&sql_tx, block, PrunableView::raw())?;
        }

        sql_tx.execute("DELETE FROM phasing_result WHERE height > ?1", params![height as i64])?;
        sql_tx.execute("DELETE FROM tx WHERE height > ?1", params![height as i64])?;
        sql_tx.execute("DELETE FROM block WHERE height > ?1", params![height as i64])?;
        sql_tx.commit()?;
        Ok(blocks)
    }

    pub(crate) fn record_phasing_result(
        &self,
        transaction_id: TransactionId,
        approved: bool,
        height: u64,
    ) -> Result<()> {
        let conn = self.writer.lock();
        conn.execute(
            "INSERT OR REPLACE INTO phasing_result (transaction_id, approved, height)
             VALUES (?1, ?2, ?3)",
            params![transaction_id as i64, approved, height as i64],
        )?;
        Ok(())
    }

    /// Drops prunable payload bytes whose retention window ended before
    /// `now`. The transaction rows stay.
    pub(crate) fn purge_expired_prunable(&self, now: i64) -> Result<usize> {
        let conn = self.writer.lock();
        let purged = conn.execute(
            "UPDATE tx SET prunable_data = NULL
             WHERE prunable_data IS NOT NULL AND block_timestamp + ?1 < ?2",
            params![self.options.prunable_retention_secs, now],
        )?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::ReferenceBlock;
    use crate::crypto::KeyPair;
    use crate::transaction::{PrunableData, TransactionBuilder};

    fn store() -> LedgerStore {
        LedgerStore::temporary(StoreOptions {
            page_size: 2,
            ..StoreOptions::default()
        })
        .unwrap()
    }

    fn tx(keypair: &KeyPair, amount: i64) -> Transaction {
        TransactionBuilder::new(0, 0)
            .timestamp(500)
            .amount(amount)
            .prunable(vec![amount as u8; 4])
            .build(ReferenceBlock { height: 0, id: 0 }, keypair)
            .unwrap()
    }

    #[test]
    fn test_point_lookups() {
        let store = store();
        assert!(store.last_block().unwrap().is_none());

        let keypair = KeyPair::generate().unwrap();
        let genesis = Block::genesis(100, 1, vec![tx(&keypair, 1), tx(&keypair, 2)]);
        store.append_block(&genesis).unwrap();

        let last = store.last_block().unwrap().unwrap();
        assert_eq!(last.header, genesis.header);
        assert_eq!(last.transactions.len(), 2);
        // Stamped long ago, so the payloads are past retention for readers.
        assert_eq!(last.transactions[0].prunable, Some(PrunableData::Unavailable));
        assert_eq!(store.get_block_at_height(0).unwrap().map(|b| b.id), Some(genesis.id));
        assert_eq!(store.block_id_at_height(0).unwrap(), Some(genesis.id));
        assert!(store.has_block(genesis.id).unwrap());
        assert!(!store.has_block(genesis.id ^ 1).unwrap());

        let first = &genesis.transactions[0];
        assert!(store.has_transaction(first.id).unwrap());
        assert!(store.has_transaction_by_full_hash(&first.full_hash).unwrap());
        assert!(store.get_transaction(first.id ^ 1).unwrap().is_none());
        assert_eq!(store.transaction_count().unwrap(), 2);
        assert_eq!(store.readers_in_use(), 0);
    }

    #[test]
    fn test_duplicate_height_fails_atomically() {
        let store = store();
        let keypair = KeyPair::generate().unwrap();
        let genesis = Block::genesis(100, 1, vec![]);
        store.append_block(&genesis).unwrap();

        let rival = Block::genesis(200, 2, vec![tx(&keypair, 3)]);
        let err = store.append_block(&rival).unwrap_err();
        assert!(matches!(err, ChainError::StorageFailure(_)));
        assert_eq!(store.transaction_count().unwrap(), 0);
    }

    #[test]
    fn test_remove_blocks_above() {
        let store = store();
        let keypair = KeyPair::generate().unwrap();
        let genesis = Block::genesis(100, 1, vec![]);
        let one = genesis.successor(110, 1, vec![tx(&keypair, 1)]);
        let two = one.successor(120, 1, vec![tx(&keypair, 2), tx(&keypair, 3)]);
        for block in [&genesis, &one, &two] {
            store.append_block(block).unwrap();
        }
        store
            .record_phasing_result(two.transactions[0].id, true, 2)
            .unwrap();

        let removed = store.remove_blocks_above(0).unwrap();
        assert_eq!(removed, vec![two, one]);
        assert_eq!(store.transaction_count().unwrap(), 0);
        assert_eq!(store.last_block().unwrap().map(|b| b.id), Some(genesis.id));
    }

    #[test]
    fn test_purge_keeps_rows() {
        let store = store();
        let keypair = KeyPair::generate().unwrap();
        let genesis = Block::genesis(100, 1, vec![tx(&keypair, 9)]);
        store.append_block(&genesis).unwrap();
        let id = genesis.transactions[0].id;

        // Retention has not run out yet at this reference time.
        let retention = store.options().prunable_retention_secs;
        assert_eq!(store.purge_expired_prunable(100 + retention).unwrap(), 0);
        assert_eq!(store.purge_expired_prunable(101 + retention).unwrap(), 1);

        let raw = store
            .transactions(&TransactionQuery::new().include_expired_prunable(true))
            .unwrap()
            .into_vec()
            .unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].id, id);
        assert_eq!(raw[0].prunable, Some(PrunableData::Unavailable));
    }

    #[test]
    fn test_as_of_controls_expiry() {
        let store = store();
        let keypair = KeyPair::generate().unwrap();
        let genesis = Block::genesis(100, 1, vec![tx(&keypair, 4)]);
        store.append_block(&genesis).unwrap();
        let retention = store.options().prunable_retention_secs;

        let before = store
            .transactions(&TransactionQuery::new().as_of(100 + retention))
            .unwrap()
            .into_vec()
            .unwrap();
        assert_eq!(before[0].prunable, Some(PrunableData::Available(vec![4; 4])));

        let after = store
            .transactions(&TransactionQuery::new().as_of(101 + retention))
            .unwrap()
            .into_vec()
            .unwrap();
        assert_eq!(after[0].prunable, Some(PrunableData::Unavailable));
    }

    #[test]
    fn test_custom_query_escape_hatch() {
        let store = store();
        let keypair = KeyPair::generate().unwrap();
        let genesis = Block::genesis(100, 1, (1..=5).map(|i| tx(&keypair, i)).collect());
        store.append_block(&genesis).unwrap();

        let sql = format!(
            "SELECT {} FROM tx WHERE amount >= ? ORDER BY amount DESC",
            TRANSACTION_COLUMNS
        );
        let amounts: Vec<i64> = store
            .transactions_by_query(SqlQuery::new(sql).bind(3i64).page(Page::first(2)))
            .unwrap()
            .map(|tx| tx.unwrap().body.amount)
            .collect();
        assert_eq!(amounts, vec![5, 4]);
    }
}
