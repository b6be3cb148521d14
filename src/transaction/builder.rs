//! Construction of signed transactions anchored to a reference block.

use crate::blockchain::ReferenceBlock;
use crate::crypto::{sha256, AccountId, SigningIdentity};
use crate::error::ChainError;
use crate::transaction::types::{Transaction, TransactionBody, TransactionId};

#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    tx_type: u8,
    subtype: u8,
    timestamp: i64,
    recipient_id: Option<AccountId>,
    amount: i64,
    fee: i64,
    referenced_transaction_id: Option<TransactionId>,
    phased: bool,
    private: bool,
    message: Option<Vec<u8>>,
    attachment: Vec<u8>,
    prunable: Option<Vec<u8>>,
}

impl TransactionBuilder {
    pub fn new(tx_type: u8, subtype: u8) -> Self {
        TransactionBuilder {
            tx_type,
            subtype,
            timestamp: chrono::Utc::now().timestamp(),
            recipient_id: None,
            amount: 0,
            fee: 0,
            referenced_transaction_id: None,
            phased: false,
            private: false,
            message: None,
            attachment: Vec::new(),
            prunable: None,
        }
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn recipient(mut self, recipient_id: AccountId) -> Self {
        self.recipient_id = Some(recipient_id);
        self
    }

    pub fn amount(mut self, amount: i64) -> Self {
        self.amount = amount;
        self
    }

    pub fn fee(mut self, fee: i64) -> Self {
        self.fee = fee;
        self
    }

    pub fn references(mut self, transaction_id: TransactionId) -> Self {
        self.referenced_transaction_id = Some(transaction_id);
        self
    }

    pub fn phased(mut self, phased: bool) -> Self {
        self.phased = phased;
        self
    }

    pub fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn message(mut self, message: impl Into<Vec<u8>>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn attachment(mut self, attachment: impl Into<Vec<u8>>) -> Self {
        self.attachment = attachment.into();
        self
    }

    pub fn prunable(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.prunable = Some(payload.into());
        self
    }

    /// Signs the transaction with `identity`, anchoring it to `reference`.
    pub fn build(
        self,
        reference: ReferenceBlock,
        identity: &dyn SigningIdentity,
    ) -> Result<Transaction, ChainError> {
        let sender_public_key = identity.public_key();
        let body = TransactionBody {
            tx_type: self.tx_type,
            subtype: self.subtype,
            timestamp: self.timestamp,
            sender_id: identity.account_id(),
            sender_public_key,
            recipient_id: self.recipient_id,
            amount: self.amount,
            fee: self.fee,
            ec_block_height: reference.height,
            ec_block_id: reference.id,
            referenced_transaction_id: self.referenced_transaction_id,
            phased: self.phased,
            private: self.private,
            message: self.message,
            attachment: self.attachment,
            prunable_hash: self.prunable.as_deref().map(sha256),
        };
        let signature = identity.sign(&body.signable_bytes()?)?;
        Transaction::from_parts(body, signature, self.prunable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::transaction::PrunableData;

    fn reference() -> ReferenceBlock {
        ReferenceBlock { height: 0, id: 7 }
    }

    #[test]
    fn test_built_transaction_validates() {
        let keypair = KeyPair::generate().unwrap();
        let tx = TransactionBuilder::new(0, 0)
            .recipient(99)
            .amount(500)
            .fee(1)
            .message("hello")
            .build(reference(), &keypair)
            .unwrap();

        assert!(tx.validate().is_ok());
        assert_eq!(tx.sender_id(), keypair.account_id());
        assert_eq!(tx.body.ec_block_id, 7);
        assert!(tx.has_message());
        assert!(tx.placement.is_none());
    }

    #[test]
    fn test_tampered_body_fails_validation() {
        let keypair = KeyPair::generate().unwrap();
        let mut tx = TransactionBuilder::new(0, 0)
            .amount(10)
            .build(reference(), &keypair)
            .unwrap();
        tx.body.amount = 10_000;
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_prunable_payload_is_committed() {
        let keypair = KeyPair::generate().unwrap();
        let tx = TransactionBuilder::new(1, 0)
            .prunable(vec![1, 2, 3])
            .build(reference(), &keypair)
            .unwrap();
        assert_eq!(tx.prunable, Some(PrunableData::Available(vec![1, 2, 3])));
        assert_eq!(tx.body.prunable_hash, Some(sha256(&[1, 2, 3])));

        // Dropping the payload keeps the identity of the transaction intact.
        let mut pruned = tx.clone();
        pruned.prunable = Some(PrunableData::Unavailable);
        assert!(pruned.validate().is_ok());
        assert_eq!(pruned.full_hash, tx.full_hash);
    }

    #[test]
    fn test_distinct_signers_give_distinct_ids() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        let builder = TransactionBuilder::new(0, 0).timestamp(1_000).amount(1);
        let tx_a = builder.clone().build(reference(), &a).unwrap();
        let tx_b = builder.build(reference(), &b).unwrap();
        assert_ne!(tx_a.id, tx_b.id);
        assert_ne!(tx_a.full_hash, tx_b.full_hash);
    }
}
