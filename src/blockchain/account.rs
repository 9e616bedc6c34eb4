use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::collections::HashMap;

use super::block::Block;
use super::crypto::Address;
use super::transaction::Transaction;

/// Errors that can occur during account operations
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invalid transaction signature")]
    InvalidSignature,

    #[error("Invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },
}

/// Represents an account in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Account {
    /// The account's address
    pub address: Address,

    /// Number of transactions sent from this account
    pub nonce: u64,

    /// The account's balance
    pub balance: u64,
}

impl Account {
    /// Creates a new empty account
    pub fn new(address: Address) -> Self {
        Account {
            address,
            nonce: 0,
            balance: 0,
        }
    }
}

/// Balances and nonces of every account, derived by replaying the chain.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    accounts: HashMap<Address, Account>,
}

impl Ledger {
    /// Creates an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays every transaction of every block in chain order.
    ///
    /// Blocks on the chain have already been validated, so a failing
    /// transaction here is logged and skipped rather than aborting the replay.
    pub fn from_chain(blocks: &[Block]) -> Self {
        let mut ledger = Ledger::new();
        for block in blocks {
            for transaction in &block.transactions {
                if let Err(err) = ledger.apply_transaction(transaction) {
                    error!(
                        "Transaction in block {} failed to replay: {} ({})",
                        block.number, transaction, err
                    );
                }
            }
        }
        ledger
    }

    /// Applies the transaction if it is valid against the current account state
    ///
    /// # Arguments
    ///
    /// * `transaction` - A coinbase or a signed transfer
    ///
    /// # Returns
    ///
    /// * `Result<(), AccountError>` - Ok if the ledger changed, otherwise the
    ///   reason the transfer does not apply; the ledger is left untouched
    pub fn apply_transaction(&mut self, transaction: &Transaction) -> Result<(), AccountError> {
        if !transaction.valid_signature() {
            return Err(AccountError::InvalidSignature);
        }
        if let Some(sender) = &transaction.sender {
            self.debit(sender, transaction.amount, transaction.nonce)?;
        }
        self.credit(&transaction.receiver, transaction.amount);
        Ok(())
    }

    /// Returns the account matching the address
    pub fn read(&self, address: &Address) -> Result<&Account, AccountError> {
        self.accounts
            .get(address)
            .ok_or_else(|| AccountError::AccountNotFound(address.to_string()))
    }

    /// Returns all known accounts
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    /// Nonce of the last transaction applied from `address`, zero for unknown accounts
    pub fn nonce_of(&self, address: &Address) -> u64 {
        self.accounts.get(address).map_or(0, |account| account.nonce)
    }

    fn credit(&mut self, address: &Address, amount: u64) {
        self.accounts
            .entry(address.clone())
            .or_insert_with(|| Account::new(address.clone()))
            .balance += amount;
    }

    fn debit(&mut self, address: &Address, amount: u64, nonce: u64) -> Result<(), AccountError> {
        let account = self
            .accounts
            .get_mut(address)
            .ok_or_else(|| AccountError::AccountNotFound(address.to_string()))?;

        if nonce != account.nonce + 1 {
            return Err(AccountError::InvalidNonce {
                expected: account.nonce + 1,
                got: nonce,
            });
        }
        if amount > account.balance {
            return Err(AccountError::InsufficientBalance {
                required: amount,
                available: account.balance,
            });
        }

        account.balance -= amount;
        account.nonce += 1;
        Ok(())
    }
}
