//! Row <-> domain mapping for the `block` and `tx` tables.

use crate::blockchain::{Block, BlockHeader};
use crate::error::{ChainError, Result};
use crate::transaction::{BlockPlacement, PrunableData, Transaction, TransactionBody};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

pub const BLOCK_COLUMNS: &str =
    "id, height, timestamp, previous_block_id, generator_id, payload_hash";

pub const TRANSACTION_COLUMNS: &str = "id, full_hash, block_id, height, block_timestamp, \
     transaction_index, type, subtype, timestamp, sender_id, sender_public_key, recipient_id, \
     amount, fee, ec_block_height, ec_block_id, referenced_transaction_id, phased, private, \
     message, attachment, prunable_hash, prunable_data, signature";

fn hash_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; 32]> {
    let bytes: Vec<u8> = row.get(idx)?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            Box::new(ChainError::StorageFailure(format!(
                "expected a 32-byte hash, found {} bytes",
                bytes.len()
            ))),
        )
    })
}

fn optional_hash_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<[u8; 32]>> {
    let bytes: Option<Vec<u8>> = row.get(idx)?;
    match bytes {
        Some(_) => hash_column(row, idx).map(Some),
        None => Ok(None),
    }
}

/// Maps a [`BLOCK_COLUMNS`] row; transactions are attached separately.
pub fn block_from_row(row: &Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        id: row.get::<_, i64>(0)? as u64,
        header: BlockHeader {
            height: row.get::<_, i64>(1)? as u64,
            timestamp: row.get(2)?,
            previous_block_id: row.get::<_, Option<i64>>(3)?.map(|id| id as u64),
            generator_id: row.get::<_, i64>(4)? as u64,
            payload_hash: hash_column(row, 5)?,
        },
        transactions: Vec::new(),
    })
}

/// Maps a [`TRANSACTION_COLUMNS`] row with the prunable payload as stored.
pub fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let prunable_hash = optional_hash_column(row, 21)?;
    let prunable_data: Option<Vec<u8>> = row.get(22)?;
    let prunable = prunable_hash.map(|_| match prunable_data {
        Some(bytes) => PrunableData::Available(bytes),
        None => PrunableData::Unavailable,
    });

    Ok(Transaction {
        id: row.get::<_, i64>(0)? as u64,
        full_hash: hash_column(row, 1)?,
        placement: Some(BlockPlacement {
            block_id: row.get::<_, i64>(2)? as u64,
            height: row.get::<_, i64>(3)? as u64,
            block_timestamp: row.get(4)?,
            index: row.get(5)?,
        }),
        body: TransactionBody {
            tx_type: row.get(6)?,
            subtype: row.get(7)?,
            timestamp: row.get(8)?,
            sender_id: row.get::<_, i64>(9)? as u64,
            sender_public_key: row.get(10)?,
            recipient_id: row.get::<_, Option<i64>>(11)?.map(|id| id as u64),
            amount: row.get(12)?,
            fee: row.get(13)?,
            ec_block_height: row.get::<_, i64>(14)? as u64,
            ec_block_id: row.get::<_, i64>(15)? as u64,
            referenced_transaction_id: row.get::<_, Option<i64>>(16)?.map(|id| id as u64),
            phased: row.get(17)?,
            private: row.get(18)?,
            message: row.get(19)?,
            attachment: row.get(20)?,
            prunable_hash,
        },
        signature: row.get(23)?,
        prunable,
    })
}

/// How prunable payloads are presented to a reader.
#[derive(Debug, Clone, Copy)]
pub struct PrunableView {
    pub now: i64,
    pub retention_secs: i64,
    pub include_expired: bool,
}

impl PrunableView {
    /// Everything still stored is returned; used by the write path.
    pub fn raw() -> Self {
        PrunableView {
            now: 0,
            retention_secs: 0,
            include_expired: true,
        }
    }

    pub fn is_expired(&self, block_timestamp: i64) -> bool {
        block_timestamp.saturating_add(self.retention_secs) < self.now
    }

    pub fn apply(&self, mut tx: Transaction) -> Transaction {
        if self.include_expired {
            return tx;
        }
        let expired = tx.block_timestamp().map_or(false, |ts| self.is_expired(ts));
        if expired {
            if let Some(prunable) = tx.prunable.as_mut() {
                *prunable = PrunableData::Unavailable;
            }
        }
        tx
    }
}

pub fn load_block_transactions(
    conn: &Connection,
    block: &mut Block,
    view: PrunableView,
) -> Result<()> {
    let sql = format!(
        "SELECT {} FROM tx WHERE block_id = ?1 ORDER BY transaction_index ASC",
        TRANSACTION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let transactions = stmt
        .query_map(params![block.id as i64], transaction_from_row)?
        .map(|row| row.map(|tx| view.apply(tx)))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    block.transactions = transactions;
    Ok(())
}

pub fn insert_block(conn: &Connection, block: &Block) -> Result<()> {
    conn.execute(
        "INSERT INTO block (id, height, timestamp, previous_block_id, generator_id, payload_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            block.id as i64,
            block.header.height as i64,
            block.header.timestamp,
            block.header.previous_block_id.map(|id| id as i64),
            block.header.generator_id as i64,
            block.header.payload_hash.to_vec(),
        ],
    )?;

    let mut stmt = conn.prepare_cached(
        "INSERT INTO tx (id, full_hash, block_id, height, block_timestamp, transaction_index,
             type, subtype, timestamp, sender_id, sender_public_key, recipient_id, amount, fee,
             ec_block_height, ec_block_id, referenced_transaction_id, phased, private,
             has_message, message, attachment, prunable_hash, prunable_data, signature)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
             ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
    )?;
    for (index, tx) in block.transactions.iter().enumerate() {
        let body = &tx.body;
        let prunable_data = tx.prunable.as_ref().and_then(|p| p.bytes()).map(|b| b.to_vec());
        stmt.execute(params![
            tx.id as i64,
            tx.full_hash.to_vec(),
            block.id as i64,
            block.header.height as i64,
            block.header.timestamp,
            index as i64,
            body.tx_type,
            body.subtype,
            body.timestamp,
            body.sender_id as i64,
            body.sender_public_key,
            body.recipient_id.map(|id| id as i64),
            body.amount,
            body.fee,
            body.ec_block_height as i64,
            body.ec_block_id as i64,
            body.referenced_transaction_id.map(|id| id as i64),
            body.phased,
            body.private,
            body.message.is_some(),
            body.message,
            body.attachment,
            body.prunable_hash.map(|h| h.to_vec()),
            prunable_data,
            tx.signature,
        ])?;
    }
    Ok(())
}
