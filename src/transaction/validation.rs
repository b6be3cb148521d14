//! Stateless checks applied before a transaction is accepted anywhere
use crate::crypto::{account_id_from_public_key, sha256, verify_signature};
use crate::error::ChainError;
use crate::transaction::types::Transaction;

impl Transaction {
    /// Checks the signature, the sender id and the derived identifiers.
    /// Chain-dependent checks (the reference block) live with the blockchain.
    pub fn validate(&self) -> Result<(), ChainError> {
        self.validate_size()?;

        if account_id_from_public_key(&self.body.sender_public_key) != self.body.sender_id {
            return Err(ChainError::InvalidTransaction(format!(
                "Sender id {} does not match the sender public key",
                self.body.sender_id
            )));
        }

        let message = self.body.signable_bytes()?;
        verify_signature(&self.body.sender_public_key, &message, &self.signature)?;

        let full_hash = Transaction::calculate_full_hash(&self.body, &self.signature)?;
        if full_hash != self.full_hash {
            return Err(ChainError::InvalidTransaction(format!(
                "Full hash mismatch for transaction {}",
                self.id
            )));
        }
        if crate::crypto::id_from_digest(&full_hash) != self.id {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction id {} is not derived from its full hash",
                self.id
            )));
        }

        // An unavailable payload is fine; one that is present must match.
        if let Some(bytes) = self.prunable.as_ref().and_then(|p| p.bytes()) {
            if self.body.prunable_hash != Some(sha256(bytes)) {
                return Err(ChainError::InvalidTransaction(format!(
                    "Prunable payload of transaction {} does not match its hash",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::blockchain::ReferenceBlock;
    use crate::crypto::KeyPair;
    use crate::error::ChainError;
    use crate::transaction::{PrunableData, TransactionBuilder};

    #[test]
    fn test_swapped_payload_is_rejected() {
        let keypair = KeyPair::generate().unwrap();
        let mut tx = TransactionBuilder::new(1, 0)
            .prunable(b"original".to_vec())
            .build(ReferenceBlock { height: 0, id: 0 }, &keypair)
            .unwrap();
        assert!(tx.validate().is_ok());

        tx.prunable = Some(PrunableData::Available(b"forged".to_vec()));
        assert!(matches!(tx.validate(), Err(ChainError::InvalidTransaction(_))));
    }

    #[test]
    fn test_foreign_sender_id_is_rejected() {
        let keypair = KeyPair::generate().unwrap();
        let mut tx = TransactionBuilder::new(0, 0)
            .build(ReferenceBlock { height: 0, id: 0 }, &keypair)
            .unwrap();
        tx.body.sender_id ^= 1;
        assert!(tx.validate().is_err());
    }
}
