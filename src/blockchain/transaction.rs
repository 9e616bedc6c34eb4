use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;

use super::crypto::{verify_signature, Address, DigitalSignature, Wallet};

/// Amount paid to the miner of every block
pub const COINBASE_REWARD: u64 = 10;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid sender address: {0}")]
    InvalidSenderAddress(String),

    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("Transaction not signed")]
    NotSigned,

    #[error("System error: {0}")]
    SystemError(String),
}

/// A transfer of coins from `sender` to `receiver`.
///
/// Transactions without a sender are coinbase transactions which mint the
/// block reward for the miner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address, absent for coinbase transactions
    pub sender: Option<Address>,

    /// Receiver's address
    pub receiver: Address,

    /// Amount being transferred
    pub amount: u64,

    /// Sender's transaction counter, must be exactly one above the sender's account nonce
    pub nonce: u64,

    /// Signature over the signing payload
    pub signature: Option<DigitalSignature>,
}

/// The part of a transaction covered by its signature
#[derive(Serialize)]
struct SigningPayload<'a> {
    sender: &'a Option<Address>,
    receiver: &'a Address,
    amount: u64,
    nonce: u64,
}

impl Transaction {
    /// Creates a new unsigned transaction
    pub fn new(sender: Address, receiver: Address, amount: u64, nonce: u64) -> Self {
        Transaction {
            sender: Some(sender),
            receiver,
            amount,
            nonce,
            signature: None,
        }
    }

    /// Creates the reward transaction for the miner of a block
    pub fn coinbase_to(receiver: Address) -> Self {
        Transaction {
            sender: None,
            receiver,
            amount: COINBASE_REWARD,
            nonce: 0,
            signature: None,
        }
    }

    /// Signs the transaction with the sender's wallet and returns the signature
    pub fn sign(&mut self, wallet: &Wallet) -> Result<DigitalSignature, TransactionError> {
        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        if self.sender.as_ref() != Some(wallet.address()) {
            return Err(TransactionError::InvalidSenderAddress(
                "Wallet address does not match sender address".to_string(),
            ));
        }

        let signature = wallet.sign(&self.signing_hash()?);
        self.signature = Some(signature.clone());

        Ok(signature)
    }

    /// Indicates whether the transaction is correctly signed.
    ///
    /// Coinbase transactions carry no signature, so for them this only checks
    /// their shape.
    pub fn valid_signature(&self) -> bool {
        let sender = match &self.sender {
            Some(sender) => sender,
            None => return self.is_coinbase(),
        };
        let signature = match &self.signature {
            Some(signature) => signature,
            None => return false,
        };
        let public_key = match sender.to_public_key() {
            Ok(key) => key,
            Err(_) => return false,
        };
        let hash = match self.signing_hash() {
            Ok(hash) => hash,
            Err(_) => return false,
        };

        verify_signature(&hash, signature, &public_key).unwrap_or(false)
    }

    /// Checks if the transaction is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.sender.is_none() && self.amount == COINBASE_REWARD
    }

    /// Pool identity of the transaction: its base64 encoded signature
    pub fn id(&self) -> Option<String> {
        let bytes = self.signature.as_ref()?.to_bytes().ok()?;
        Some(STANDARD.encode(bytes))
    }

    /// SHA-256 over the JSON encoding of everything but the signature
    fn signing_hash(&self) -> Result<Vec<u8>, TransactionError> {
        let payload = SigningPayload {
            sender: &self.sender,
            receiver: &self.receiver,
            amount: self.amount,
            nonce: self.nonce,
        };
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| TransactionError::SystemError(e.to_string()))?;

        Ok(Sha256::digest(bytes).to_vec())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sender {
            Some(sender) => write!(
                f,
                "Transaction: {} coins from {} to {}",
                self.amount, sender, self.receiver
            ),
            None => write!(f, "Transaction: {} coins to miner {}", self.amount, self.receiver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(sender: &Wallet, receiver: &Wallet, amount: u64, nonce: u64) -> Transaction {
        let mut transaction = Transaction::new(
            sender.address().clone(),
            receiver.address().clone(),
            amount,
            nonce,
        );
        transaction.sign(sender).unwrap();
        transaction
    }

    #[test]
    fn test_sign_transaction() {
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();

        let transaction = signed(&sender, &receiver, 10, 1);

        assert!(transaction.signature.is_some());
        assert!(transaction.valid_signature());
    }

    #[test]
    fn test_signed_by_wrong_key() {
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();

        let mut transaction = signed(&receiver, &sender, 10, 1);
        transaction.sender = Some(sender.address().clone());

        assert!(!transaction.valid_signature());
    }

    #[test]
    fn test_sign_with_foreign_wallet_is_rejected() {
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let mut transaction =
            Transaction::new(sender.address().clone(), receiver.address().clone(), 5, 1);

        assert!(matches!(
            transaction.sign(&receiver),
            Err(TransactionError::InvalidSenderAddress(_))
        ));
        assert!(transaction.signature.is_none());
    }

    #[test]
    fn test_sign_twice_is_rejected() {
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let mut transaction = signed(&sender, &receiver, 10, 1);

        assert!(matches!(
            transaction.sign(&sender),
            Err(TransactionError::AlreadySigned)
        ));
    }

    #[test]
    fn test_tampering_invalidates_signature() {
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let other = Wallet::new().unwrap();
        let original = signed(&sender, &receiver, 10, 1);

        let mut amount = original.clone();
        amount.amount = 11;
        assert!(!amount.valid_signature());

        let mut redirected = original.clone();
        redirected.receiver = other.address().clone();
        assert!(!redirected.valid_signature());

        let mut replayed = original;
        replayed.nonce = 2;
        assert!(!replayed.valid_signature());
    }

    #[test]
    fn test_unsigned_transaction_is_invalid() {
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let transaction =
            Transaction::new(sender.address().clone(), receiver.address().clone(), 1, 1);

        assert!(!transaction.valid_signature());
        assert!(transaction.id().is_none());
    }

    #[test]
    fn test_coinbase_transaction() {
        let miner = Wallet::new().unwrap();

        let transaction = Transaction::coinbase_to(miner.address().clone());

        assert!(transaction.sender.is_none());
        assert_eq!(transaction.receiver, *miner.address());
        assert_eq!(transaction.amount, COINBASE_REWARD);
        assert!(transaction.is_coinbase());
        assert!(transaction.valid_signature());
    }

    #[test]
    fn test_coinbase_with_wrong_reward_is_invalid() {
        let miner = Wallet::new().unwrap();
        let mut transaction = Transaction::coinbase_to(miner.address().clone());
        transaction.amount = COINBASE_REWARD * 100;

        assert!(!transaction.is_coinbase());
        assert!(!transaction.valid_signature());
    }

    #[test]
    fn test_id_is_base64_signature() {
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let transaction = signed(&sender, &receiver, 3, 1);

        let id = transaction.id().unwrap();
        let decoded = STANDARD.decode(id).unwrap();

        assert_eq!(decoded, transaction.signature.unwrap().to_bytes().unwrap());
    }
}
