use crate::crypto::{id_from_digest, AccountId, Sha256Hash};
use crate::transaction::{BlockPlacement, Transaction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type BlockId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub timestamp: i64,
    /// `None` only for genesis.
    pub previous_block_id: Option<BlockId>,
    pub generator_id: AccountId,
    pub payload_hash: Sha256Hash,
}

impl BlockHeader {
    pub fn hash(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.previous_block_id.unwrap_or(0).to_le_bytes());
        hasher.update(self.generator_id.to_le_bytes());
        hasher.update(self.payload_hash);
        hasher.finalize().into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub header: BlockHeader,
    /// In inclusion order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Builds a block and stamps every transaction with its placement.
    pub fn new(
        height: u64,
        previous_block_id: Option<BlockId>,
        timestamp: i64,
        generator_id: AccountId,
        transactions: Vec<Transaction>,
    ) -> Self {
        let header = BlockHeader {
            height,
            timestamp,
            previous_block_id,
            generator_id,
            payload_hash: Block::calculate_payload_hash(&transactions),
        };
        let id = id_from_digest(&header.hash());
        let transactions = transactions
            .into_iter()
            .enumerate()
            .map(|(index, mut tx)| {
                tx.placement = Some(BlockPlacement {
                    block_id: id,
                    height,
                    block_timestamp: timestamp,
                    index: index as u32,
                });
                tx
            })
            .collect();
        Block {
            id,
            header,
            transactions,
        }
    }

    pub fn genesis(timestamp: i64, generator_id: AccountId, transactions: Vec<Transaction>) -> Self {
        Block::new(0, None, timestamp, generator_id, transactions)
    }

    /// Builds the block that extends `self`.
    pub fn successor(
        &self,
        timestamp: i64,
        generator_id: AccountId,
        transactions: Vec<Transaction>,
    ) -> Self {
        Block::new(self.height() + 1, Some(self.id), timestamp, generator_id, transactions)
    }

    pub fn calculate_payload_hash(transactions: &[Transaction]) -> Sha256Hash {
        let mut hasher = Sha256::new();
        for tx in transactions {
            hasher.update(tx.full_hash);
        }
        hasher.finalize().into()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    pub fn previous_block_id(&self) -> Option<BlockId> {
        self.header.previous_block_id
    }

    pub fn generator_id(&self) -> AccountId {
        self.header.generator_id
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.previous_block_id.is_none()
    }
}
