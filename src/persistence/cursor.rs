//! Lazy, forward-only streaming over query results.
//!
//! A [`Cursor`] owns one pooled reader connection and pulls rows from it in
//! batches. The connection goes back to the pool exactly once: as soon as the
//! result set is exhausted, when a fetch fails, or when the cursor is dropped
//! early. A cursor is not restartable; run the query again to re-scan.
//!
//! Every batch is read inside one deferred read transaction opened on the
//! first fetch, so a cursor sees a single snapshot of the ledger even when
//! blocks are appended while it is being drained.

use super::pool::PooledConnection;
use super::query::SqlQuery;
use crate::error::Result;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::collections::VecDeque;
use tracing::{debug, warn};

pub(crate) type RowMapper<T> = fn(&Row<'_>) -> rusqlite::Result<T>;

/// Post-processing run on each row while the connection is still held
/// (loading a block's transactions, hiding expired prunable data).
pub(crate) type Finisher<T> = Box<dyn Fn(&Connection, T) -> Result<T> + Send>;

pub struct Cursor<T> {
    conn: Option<PooledConnection>,
    sql: String,
    params: Vec<Value>,
    map_row: RowMapper<T>,
    finish: Option<Finisher<T>>,
    buffer: VecDeque<T>,
    offset: u64,
    remaining: Option<u64>,
    batch_size: u64,
    in_snapshot: bool,
}

impl<T> Cursor<T> {
    pub(crate) fn new(
        conn: PooledConnection,
        query: SqlQuery,
        map_row: RowMapper<T>,
        batch_size: u32,
    ) -> Self {
        Cursor {
            conn: Some(conn),
            sql: format!("{} LIMIT ? OFFSET ?", query.sql),
            params: query.params,
            map_row,
            finish: None,
            buffer: VecDeque::new(),
            offset: query.page.offset,
            remaining: query.page.limit,
            batch_size: u64::from(batch_size.max(1)),
            in_snapshot: false,
        }
    }

    pub(crate) fn with_finisher(mut self, finish: Finisher<T>) -> Self {
        self.finish = Some(finish);
        self
    }

    /// Whether the cursor still holds its connection.
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Releases the connection now; rows already buffered are discarded.
    pub fn close(mut self) {
        self.buffer.clear();
        self.release();
    }

    /// Drains the cursor into a vector, stopping at the first error.
    pub fn into_vec(self) -> Result<Vec<T>> {
        self.collect()
    }

    fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            if std::mem::take(&mut self.in_snapshot) {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    warn!("Failed to end cursor snapshot: {}", e);
                }
            }
            debug!("Cursor released its connection after {} rows", self.offset);
        }
    }

    fn fetch_batch(&mut self) -> Result<()> {
        let want = match self.remaining {
            Some(remaining) => remaining.min(self.batch_size),
            None => self.batch_size,
        };
        if want == 0 {
            self.release();
            return Ok(());
        }
        let Some(pooled) = self.conn.as_ref() else {
            return Ok(());
        };
        let conn: &Connection = pooled;
        if !self.in_snapshot {
            conn.execute_batch("BEGIN DEFERRED")?;
            self.in_snapshot = true;
        }

        let mut params = self.params.clone();
        params.push(Value::Integer(want as i64));
        params.push(Value::Integer(self.offset as i64));

        let rows = {
            let mut stmt = conn.prepare_cached(&self.sql)?;
            let mapped = stmt.query_map(params_from_iter(params.iter()), self.map_row)?;
            mapped.collect::<rusqlite::Result<Vec<T>>>()?
        };
        let fetched = rows.len() as u64;

        let mut finished = Vec::with_capacity(rows.len());
        for row in rows {
            finished.push(match &self.finish {
                Some(finish) => finish(conn, row)?,
                None => row,
            });
        }

        self.buffer.extend(finished);
        self.offset += fetched;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= fetched;
        }
        if fetched < want || self.remaining == Some(0) {
            self.release();
        }
        Ok(())
    }
}

impl<T> Iterator for Cursor<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && self.conn.is_some() {
            if let Err(e) = self.fetch_batch() {
                self.release();
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl<T> Drop for Cursor<T> {
    fn drop(&mut self) {
        self.release();
    }
}
