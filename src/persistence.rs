//! Durable storage for blocks and transactions.
//!
//! SQLite in WAL mode: a single writer connection owned by [`LedgerStore`]
//! and a pool of read-only connections handed out to point lookups and
//! [`Cursor`]s.

mod cursor;
mod pool;
mod query;
mod rows;
mod store;

pub use cursor::Cursor;
pub use query::{Page, PhasingFilter, SqlQuery, TransactionQuery};
pub use rows::{BLOCK_COLUMNS, TRANSACTION_COLUMNS};
pub use store::{LedgerStore, StoreOptions};

pub(crate) use rows::PrunableView;
