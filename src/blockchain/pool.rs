use std::collections::HashMap;

use super::account::Ledger;
use super::transaction::{Transaction, TransactionError};

/// Signed transactions waiting to be mined, keyed by their signature.
///
/// Validity against the ledger is not checked on insertion; the miner
/// re-checks every transaction when it selects the contents of a block.
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    transactions: HashMap<String, Transaction>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a signed transaction. Returns `false` if it was already pooled.
    pub fn insert(&mut self, transaction: Transaction) -> Result<bool, TransactionError> {
        let id = transaction.id().ok_or(TransactionError::NotSigned)?;
        if self.transactions.contains_key(&id) {
            return Ok(false);
        }
        self.transactions.insert(id, transaction);
        Ok(true)
    }

    /// Removes every pooled transaction that appears in `included`
    pub fn remove_included(&mut self, included: &[Transaction]) -> usize {
        included
            .iter()
            .filter_map(Transaction::id)
            .filter(|id| self.transactions.remove(id).is_some())
            .count()
    }

    /// Drops transactions whose nonce the sender has already used; they can never be mined.
    pub fn evict_stale(&mut self, ledger: &Ledger) -> usize {
        let before = self.transactions.len();
        self.transactions.retain(|_, transaction| match &transaction.sender {
            Some(sender) => transaction.nonce > ledger.nonce_of(sender),
            None => false,
        });
        before - self.transactions.len()
    }

    /// Pooled transactions in selection order: ascending nonce, then identity
    pub fn pending(&self) -> Vec<&Transaction> {
        let mut pending: Vec<(&String, &Transaction)> = self.transactions.iter().collect();
        pending.sort_by(|(a_id, a), (b_id, b)| a.nonce.cmp(&b.nonce).then_with(|| a_id.cmp(b_id)));
        pending.into_iter().map(|(_, transaction)| transaction).collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
