//! Transaction types for the ledger
use crate::blockchain::BlockId;
use crate::crypto::{id_from_digest, sha256, AccountId, Sha256Hash};
use crate::error::ChainError;
use serde::{Deserialize, Serialize};

/// Maximum serialized body size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

pub type TransactionId = u64;

/// SHA-256 over the signed transaction; unique like the id.
pub type FullHash = [u8; 32];

/// Everything the sender signs.
///
/// `tx_type`/`subtype` select the semantics of `attachment`; the ledger
/// stores both without interpreting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBody {
    pub tx_type: u8,
    pub subtype: u8,
    pub timestamp: i64,
    pub sender_public_key: Vec<u8>,
    pub sender_id: AccountId,
    pub recipient_id: Option<AccountId>,
    pub amount: i64,
    pub fee: i64,
    pub ec_block_height: u64,
    pub ec_block_id: BlockId,
    pub referenced_transaction_id: Option<TransactionId>,
    pub phased: bool,
    pub private: bool,
    pub message: Option<Vec<u8>>,
    pub attachment: Vec<u8>,
    /// Commits to the prunable payload so it can be dropped later without
    /// changing the full hash.
    pub prunable_hash: Option<Sha256Hash>,
}

impl TransactionBody {
    pub fn signable_bytes(&self) -> Result<Vec<u8>, ChainError> {
        Ok(bincode::serialize(self)?)
    }
}

/// Prunable payload as seen by a reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrunableData {
    Available(Vec<u8>),
    /// Purged, or past its retention window and not explicitly requested.
    Unavailable,
}

impl PrunableData {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            PrunableData::Available(bytes) => Some(bytes),
            PrunableData::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, PrunableData::Available(_))
    }
}

/// Where a persisted transaction sits in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPlacement {
    pub block_id: BlockId,
    pub height: u64,
    pub block_timestamp: i64,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub full_hash: FullHash,
    pub body: TransactionBody,
    pub signature: Vec<u8>,
    pub prunable: Option<PrunableData>,
    /// Set once the transaction is included in a block.
    pub placement: Option<BlockPlacement>,
}

impl Transaction {
    /// Assembles a signed transaction and derives its full hash and id.
    pub fn from_parts(
        body: TransactionBody,
        signature: Vec<u8>,
        prunable: Option<Vec<u8>>,
    ) -> Result<Self, ChainError> {
        let expected = prunable.as_deref().map(sha256);
        if expected != body.prunable_hash {
            return Err(ChainError::InvalidTransaction(
                "Prunable payload does not match the committed hash".to_string(),
            ));
        }
        let full_hash = Self::calculate_full_hash(&body, &signature)?;
        Ok(Transaction {
            id: id_from_digest(&full_hash),
            full_hash,
            body,
            signature,
            prunable: prunable.map(PrunableData::Available),
            placement: None,
        })
    }

    pub fn calculate_full_hash(body: &TransactionBody, signature: &[u8]) -> Result<FullHash, ChainError> {
        let mut bytes = body.signable_bytes()?;
        bytes.extend_from_slice(&sha256(signature));
        Ok(sha256(&bytes))
    }

    pub fn full_hash_hex(&self) -> String {
        hex::encode(self.full_hash)
    }

    pub fn sender_id(&self) -> AccountId {
        self.body.sender_id
    }

    pub fn recipient_id(&self) -> Option<AccountId> {
        self.body.recipient_id
    }

    pub fn height(&self) -> Option<u64> {
        self.placement.map(|p| p.height)
    }

    pub fn block_timestamp(&self) -> Option<i64> {
        self.placement.map(|p| p.block_timestamp)
    }

    pub fn has_message(&self) -> bool {
        self.body.message.is_some()
    }

    pub fn is_phased(&self) -> bool {
        self.body.phased
    }

    pub fn involves(&self, account: AccountId) -> bool {
        self.body.sender_id == account || self.body.recipient_id == Some(account)
    }

    /// Validate body size to prevent DoS attacks
    pub fn validate_size(&self) -> Result<(), ChainError> {
        let size = self.body.signable_bytes()?.len();
        if size > MAX_TRANSACTION_SIZE {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction too large: {} bytes (max: {})",
                size, MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }
}
