//! Scan shapes: pagination, the transaction filter, and raw SQL queries.

use crate::crypto::AccountId;
use rusqlite::types::Value;

/// Offset/limit window over a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: Option<u64>,
}

impl Page {
    pub fn all() -> Self {
        Page {
            offset: 0,
            limit: None,
        }
    }

    pub fn first(limit: u64) -> Self {
        Page {
            offset: 0,
            limit: Some(limit),
        }
    }

    /// Inclusive `[from, to]` index window, as API callers express it.
    /// `to < from` selects nothing; a window reaching past `u64::MAX` is unbounded.
    pub fn range(from: u64, to: u64) -> Self {
        let limit = if to < from {
            Some(0)
        } else {
            (to - from).checked_add(1)
        };
        Page {
            offset: from,
            limit,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::all()
    }
}

/// A parameterized SELECT streamed through a cursor.
///
/// This is also the escape hatch for scan shapes the named operations do not
/// cover: the statement must select [`BLOCK_COLUMNS`](super::BLOCK_COLUMNS) or
/// [`TRANSACTION_COLUMNS`](super::TRANSACTION_COLUMNS) in order, bind with
/// anonymous `?` placeholders, and leave LIMIT/OFFSET to `page`.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub page: Page,
}

impl SqlQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        SqlQuery {
            sql: sql.into(),
            params: Vec::new(),
            page: Page::all(),
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn page(mut self, page: Page) -> Self {
        self.page = page;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhasingFilter {
    #[default]
    Any,
    PhasedOnly,
    NonPhasedOnly,
}

/// Orthogonal filter over persisted transactions. Results come back most
/// recent block first, in-block order within a block.
#[derive(Debug, Clone)]
pub struct TransactionQuery {
    /// Matches the sender or the recipient.
    pub account: Option<AccountId>,
    pub tx_type: Option<u8>,
    pub subtype: Option<u8>,
    pub min_block_timestamp: Option<i64>,
    pub with_message: bool,
    pub phasing: PhasingFilter,
    /// Non-phased transactions plus phased ones whose poll was approved.
    pub executed_only: bool,
    /// Chain height minus containing height must be at least this.
    pub min_confirmations: u64,
    pub include_expired_prunable: bool,
    pub include_private: bool,
    pub page: Page,
    /// Reference time for prunable expiry; the wall clock when unset.
    pub as_of: Option<i64>,
}

impl Default for TransactionQuery {
    fn default() -> Self {
        TransactionQuery {
            account: None,
            tx_type: None,
            subtype: None,
            min_block_timestamp: None,
            with_message: false,
            phasing: PhasingFilter::Any,
            executed_only: false,
            min_confirmations: 0,
            include_expired_prunable: false,
            include_private: true,
            page: Page::all(),
            as_of: None,
        }
    }
}

impl TransactionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, account: AccountId) -> Self {
        self.account = Some(account);
        self
    }

    pub fn kind(mut self, tx_type: u8, subtype: u8) -> Self {
        self.tx_type = Some(tx_type);
        self.subtype = Some(subtype);
        self
    }

    pub fn since(mut self, min_block_timestamp: i64) -> Self {
        self.min_block_timestamp = Some(min_block_timestamp);
        self
    }

    pub fn with_message(mut self) -> Self {
        self.with_message = true;
        self
    }

    pub fn phasing(mut self, phasing: PhasingFilter) -> Self {
        self.phasing = phasing;
        self
    }

    pub fn executed_only(mut self) -> Self {
        self.executed_only = true;
        self
    }

    pub fn confirmations(mut self, min_confirmations: u64) -> Self {
        self.min_confirmations = min_confirmations;
        self
    }

    pub fn include_expired_prunable(mut self, include: bool) -> Self {
        self.include_expired_prunable = include;
        self
    }

    pub fn include_private(mut self, include: bool) -> Self {
        self.include_private = include;
        self
    }

    pub fn page(mut self, page: Page) -> Self {
        self.page = page;
        self
    }

    pub fn as_of(mut self, timestamp: i64) -> Self {
        self.as_of = Some(timestamp);
        self
    }

    pub(crate) fn to_sql(&self) -> SqlQuery {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(account) = self.account {
            clauses.push("(sender_id = ? OR recipient_id = ?)");
            params.push(Value::Integer(account as i64));
            params.push(Value::Integer(account as i64));
        }
        if let Some(tx_type) = self.tx_type {
            clauses.push("type = ?");
            params.push(Value::Integer(i64::from(tx_type)));
            if let Some(subtype) = self.subtype {
                clauses.push("subtype = ?");
                params.push(Value::Integer(i64::from(subtype)));
            }
        }
        if let Some(timestamp) = self.min_block_timestamp {
            clauses.push("block_timestamp >= ?");
            params.push(Value::Integer(timestamp));
        }
        if self.with_message {
            clauses.push("has_message = 1");
        }
        match self.phasing {
            PhasingFilter::Any => {}
            PhasingFilter::PhasedOnly => clauses.push("phased = 1"),
            PhasingFilter::NonPhasedOnly => clauses.push("phased = 0"),
        }
        if self.executed_only {
            clauses.push(
                "(phased = 0 OR EXISTS (SELECT 1 FROM phasing_result pr \
                 WHERE pr.transaction_id = tx.id AND pr.approved = 1))",
            );
        }
        if self.min_confirmations > 0 {
            clauses.push("height <= (SELECT COALESCE(MAX(height), -1) FROM block) - ?");
            params.push(Value::Integer(self.min_confirmations as i64));
        }
        if !self.include_private {
            clauses.push("private = 0");
        }

        let mut sql = format!("SELECT {} FROM tx", super::TRANSACTION_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY height DESC, transaction_index ASC");

        SqlQuery {
            sql,
            params,
            page: self.page,
        }
    }
}
