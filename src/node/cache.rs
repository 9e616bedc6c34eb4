use dashmap::DashMap;

use std::sync::{PoisonError, RwLock};

use crate::blockchain::{Account, Address, Block, Ledger};

/// Read-only snapshot of the chain served by the API.
///
/// Only the event dispatcher writes to it; the consensus thread never shares
/// its own state.
#[derive(Debug, Default)]
pub struct BlockCache {
    blocks: RwLock<Vec<Block>>,
    accounts: DashMap<Address, Account>,
}

impl BlockCache {
    /// Creates a cache seeded with `blocks`
    pub fn new(blocks: &[Block]) -> Self {
        let cache = BlockCache::default();
        cache
            .blocks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(blocks);
        cache.refresh_accounts(blocks);
        cache
    }

    /// Appends a block and refreshes the account snapshot
    pub fn add_block(&self, block: Block) {
        let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        blocks.push(block);
        self.refresh_accounts(&blocks);
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_block(&self) -> Option<Block> {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn account(&self, address: &Address) -> Option<Account> {
        self.accounts.get(address).map(|entry| entry.value().clone())
    }

    fn refresh_accounts(&self, blocks: &[Block]) {
        // accounts never disappear from a growing chain, overwriting is enough
        for account in Ledger::from_chain(blocks).accounts() {
            self.accounts.insert(account.address.clone(), account.clone());
        }
    }
}
