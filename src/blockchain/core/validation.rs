use super::block::Block;
use crate::crypto::id_from_digest;
use crate::error::ChainError;
use std::collections::HashSet;

/// Checks that `block` extends `tip` by exactly one height. With no tip only
/// a genesis block is accepted.
pub fn validate_successor(tip: Option<&Block>, block: &Block) -> Result<(), ChainError> {
    match tip {
        None => {
            if !block.is_genesis() {
                return Err(ChainError::InvariantViolation(format!(
                    "Empty chain can only accept genesis, got height {} with previous {:?}.",
                    block.height(),
                    block.previous_block_id()
                )));
            }
        }
        Some(tip) => {
            if block.height() != tip.height() + 1 {
                return Err(ChainError::InvariantViolation(format!(
                    "Invalid block height. Expected {}, but got {}.",
                    tip.height() + 1,
                    block.height()
                )));
            }
            if block.previous_block_id() != Some(tip.id) {
                return Err(ChainError::InvariantViolation(format!(
                    "Invalid previous block id. Expected {}, but got {:?}.",
                    tip.id,
                    block.previous_block_id()
                )));
            }
        }
    }
    Ok(())
}

/// Checks the block's id, payload hash, and its transactions' placement.
pub fn validate_block_contents(block: &Block) -> Result<(), ChainError> {
    let expected_id = id_from_digest(&block.header.hash());
    if block.id != expected_id {
        return Err(ChainError::InvariantViolation(format!(
            "Block id {} does not match its header (expected {}).",
            block.id, expected_id
        )));
    }

    let expected_payload = Block::calculate_payload_hash(&block.transactions);
    if expected_payload != block.header.payload_hash {
        return Err(ChainError::InvariantViolation(format!(
            "Payload hash mismatch. Expected {}, but got {}.",
            hex::encode(expected_payload),
            hex::encode(block.header.payload_hash)
        )));
    }

    let mut seen = HashSet::new();
    for (index, tx) in block.transactions.iter().enumerate() {
        tx.validate_size()?;
        if !seen.insert(tx.id) {
            return Err(ChainError::InvariantViolation(format!(
                "Transaction {} appears twice in block {}.",
                tx.id, block.id
            )));
        }
        let placed = tx.placement.as_ref().map_or(false, |p| {
            p.block_id == block.id && p.height == block.height() && p.index as usize == index
        });
        if !placed {
            return Err(ChainError::InvariantViolation(format!(
                "Transaction {} is not placed at index {} of block {}.",
                tx.id, index, block.id
            )));
        }
    }
    Ok(())
}
