//! Anti-replay reference ("EC") blocks.
//!
//! A transaction created at time `t` anchors itself to a block old enough to
//! be treated as final: take the last block stamped at or before `t`, then
//! step back `depth` blocks from it, stopping at genesis. Validation later
//! checks that the chain still carries the declared block at that height, so
//! a transaction signed on one fork cannot be replayed onto another.

use super::block::{Block, BlockId};
use crate::error::{ChainError, Result};
use crate::persistence::LedgerStore;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_EC_CONFIRMATION_DEPTH: u64 = 720;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceBlock {
    pub height: u64,
    pub id: BlockId,
}

impl ReferenceBlock {
    pub fn of(block: &Block) -> Self {
        ReferenceBlock {
            height: block.height(),
            id: block.id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReferenceResolver {
    depth: u64,
}

impl ReferenceResolver {
    pub fn new(depth: u64) -> Self {
        ReferenceResolver { depth }
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// Height of the reference block for an anchor at `anchor_height`.
    pub fn reference_height(&self, anchor_height: u64) -> u64 {
        anchor_height.saturating_sub(self.depth)
    }

    /// Resolves the reference block for a transaction created at `timestamp`.
    ///
    /// A block stamped exactly at `timestamp` qualifies as the anchor. When
    /// no block is that old the reference is genesis. Fails with
    /// `MissingBlock` only on an empty chain.
    pub fn resolve(&self, store: &LedgerStore, timestamp: i64) -> Result<ReferenceBlock> {
        let height = match store.last_block_at(timestamp)? {
            Some(anchor) => self.reference_height(anchor.height()),
            None => 0,
        };
        let id = store.block_id_at_height(height)?.ok_or_else(|| {
            ChainError::MissingBlock(format!("no block at height {} to reference", height))
        })?;
        Ok(ReferenceBlock { height, id })
    }

    /// Checks that the chain still carries the block `tx` declares as its
    /// reference.
    pub fn validate(&self, store: &LedgerStore, tx: &Transaction) -> Result<()> {
        let declared = ReferenceBlock {
            height: tx.body.ec_block_height,
            id: tx.body.ec_block_id,
        };
        match store.block_id_at_height(declared.height)? {
            Some(id) if id == declared.id => Ok(()),
            actual => {
                let actual = actual.map_or_else(|| "no block".to_string(), |id| id.to_string());
                warn!(
                    "Transaction {} references block {} at height {}, chain has {}",
                    tx.id, declared.id, declared.height, actual
                );
                Err(ChainError::InvalidReference {
                    height: declared.height,
                    expected: actual,
                    actual: declared.id.to_string(),
                })
            }
        }
    }
}

impl Default for ReferenceResolver {
    fn default() -> Self {
        ReferenceResolver::new(DEFAULT_EC_CONFIRMATION_DEPTH)
    }
}
