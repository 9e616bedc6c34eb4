use log::{debug, info};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError, UnboundedSender};

use crate::events::Event;

use super::account::{AccountError, Ledger};
use super::block::{meets_difficulty, Block, BASE_DIFFICULTY, MAX_TRANSACTIONS_PER_BLOCK};
use super::crypto::Wallet;
use super::pool::TransactionPool;
use super::transaction::{Transaction, TransactionError};

/// Capacity of the queue feeding externally received blocks into the miner
const EXTERNAL_BLOCK_QUEUE: usize = 32;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Account error: {0}")]
    AccountError(#[from] AccountError),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Block does not extend the chain: {0}")]
    ChainLinkageViolation(String),

    #[error("Block queue is full")]
    QueueFull,

    #[error("Block queue is closed")]
    QueueClosed,

    #[error("System error: {0}")]
    SystemError(String),
}

/// Hands blocks received from peers to the miner of a [`Blockchain`].
///
/// Cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct BlockSubmitter {
    sender: mpsc::Sender<Block>,
}

impl BlockSubmitter {
    /// Queues the block without blocking
    pub fn submit(&self, block: Block) -> Result<(), BlockchainError> {
        self.sender.try_send(block).map_err(|err| match err {
            TrySendError::Full(_) => BlockchainError::QueueFull,
            TrySendError::Closed(_) => BlockchainError::QueueClosed,
        })
    }
}

/// The chain of blocks and the pool of transactions waiting to be mined.
///
/// A `Blockchain` is owned by a single thread; other threads reach it
/// through a [`BlockSubmitter`] or through the node's command queues.
#[derive(Debug)]
pub struct Blockchain {
    blocks: Vec<Block>,
    pool: TransactionPool,
    wallet: Wallet,
    difficulty: u32,
    events: Option<UnboundedSender<Event>>,
    external_sender: mpsc::Sender<Block>,
    external_blocks: mpsc::Receiver<Block>,
}

impl Blockchain {
    /// Creates a chain holding only the genesis block
    ///
    /// # Arguments
    ///
    /// * `wallet` - The wallet that receives the coinbase of every block mined here
    pub fn new(wallet: Wallet) -> Self {
        Self::with_difficulty(wallet, BASE_DIFFICULTY)
    }

    /// Like [`Blockchain::new`] with a non-standard proof of work difficulty
    pub fn with_difficulty(wallet: Wallet, difficulty: u32) -> Self {
        let (external_sender, external_blocks) = mpsc::channel(EXTERNAL_BLOCK_QUEUE);

        Blockchain {
            // the genesis block is trusted as is
            blocks: vec![Block::genesis()],
            pool: TransactionPool::new(),
            wallet,
            difficulty,
            events: None,
            external_sender,
            external_blocks,
        }
    }

    /// Publishes new blocks and transactions to `events`
    pub fn with_events(mut self, events: UnboundedSender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    /// The wallet receiving the mining rewards
    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// The chain tip
    pub fn last_block(&self) -> &Block {
        // never empty, the genesis block is always present
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub(super) fn pool_mut(&mut self) -> &mut TransactionPool {
        &mut self.pool
    }

    /// Account state after replaying the whole chain
    pub fn ledger(&self) -> Ledger {
        Ledger::from_chain(&self.blocks)
    }

    /// Appends the block if it is a valid successor of the chain tip
    ///
    /// # Arguments
    ///
    /// * `block` - A block mined locally or received from a peer
    ///
    /// # Returns
    ///
    /// * `Result<(), BlockchainError>` - Ok once the block is the new tip; its
    ///   transactions leave the pool and a `NewBlock` event is emitted
    pub fn add_block(&mut self, block: Block) -> Result<(), BlockchainError> {
        self.accept_block(block)?;
        info!("Added {}", self.last_block());
        self.emit(Event::NewBlock(self.last_block().clone()));
        Ok(())
    }

    /// Appends blocks fetched from a peer, skipping the ones already held.
    ///
    /// Nothing is announced, the blocks are already known to the network.
    pub fn import_blocks(&mut self, blocks: Vec<Block>) -> Result<usize, BlockchainError> {
        let mut imported = 0;
        for block in blocks {
            if block.number <= self.last_block().number {
                debug!("Skipping known block {}", block.number);
                continue;
            }
            self.accept_block(block)?;
            imported += 1;
        }
        if imported > 0 {
            info!("Imported {} blocks, tip is now {}", imported, self.last_block());
        }
        Ok(imported)
    }

    /// Adds a signed transaction to the pool
    pub fn add_transaction(&mut self, transaction: Transaction) -> Result<(), BlockchainError> {
        if !transaction.valid_signature() {
            return Err(TransactionError::InvalidSignature.into());
        }
        if self.pool.insert(transaction.clone())? {
            debug!("Pooled {}", transaction);
            self.emit(Event::NewTransaction(transaction));
        }
        Ok(())
    }

    /// A handle for submitting peer blocks from other threads
    pub fn block_submitter(&self) -> BlockSubmitter {
        BlockSubmitter {
            sender: self.external_sender.clone(),
        }
    }

    /// Queues a block received from a peer for the next mining race
    pub fn submit_external_block(&self, block: Block) -> Result<(), BlockchainError> {
        self.block_submitter().submit(block)
    }

    /// Next queued external block, if any
    pub(super) fn next_external_block(&mut self) -> Option<Block> {
        self.external_blocks.try_recv().ok()
    }

    /// Re-checks numbering, linkage, hashes and proof of work of the whole chain
    pub fn is_valid(&self) -> bool {
        if self.blocks.first() != Some(&Block::genesis()) {
            return false;
        }
        self.blocks.windows(2).enumerate().all(|(i, pair)| {
            let (previous, block) = (&pair[0], &pair[1]);
            block.number == i as u64 + 1
                && block.previous_hash == previous.hash
                && block.has_valid_hash()
                && meets_difficulty(&block.hash, self.difficulty)
        })
    }

    fn accept_block(&mut self, block: Block) -> Result<(), BlockchainError> {
        self.validate_block(&block)?;
        let purged = self.pool.remove_included(&block.transactions);
        if purged > 0 {
            debug!("Purged {} mined transactions from the pool", purged);
        }
        self.blocks.push(block);
        Ok(())
    }

    fn validate_block(&self, block: &Block) -> Result<(), BlockchainError> {
        let previous = self.last_block();
        if block.number != previous.number + 1 {
            return Err(BlockchainError::ChainLinkageViolation(format!(
                "expected block {}, got {}",
                previous.number + 1,
                block.number
            )));
        }
        if block.previous_hash != previous.hash {
            return Err(BlockchainError::ChainLinkageViolation(format!(
                "block {} does not point to {}",
                block.number,
                hex::encode(&previous.hash)
            )));
        }

        let count = block.transactions.len();
        if count == 0 || count > MAX_TRANSACTIONS_PER_BLOCK {
            return Err(BlockchainError::InvalidBlock(format!(
                "block has {} transactions",
                count
            )));
        }
        if !block.transactions[0].is_coinbase() {
            return Err(BlockchainError::InvalidBlock(
                "first transaction is not a coinbase".to_string(),
            ));
        }
        if block.transactions[1..].iter().any(|t| t.sender.is_none()) {
            return Err(BlockchainError::InvalidBlock(
                "only the first transaction may mint coins".to_string(),
            ));
        }

        if !block.has_valid_hash() {
            return Err(BlockchainError::InvalidBlock(
                "hash does not match contents".to_string(),
            ));
        }
        if !meets_difficulty(&block.hash, self.difficulty) {
            return Err(BlockchainError::InvalidBlock(
                "insufficient proof of work".to_string(),
            ));
        }

        let mut ledger = self.ledger();
        for (index, transaction) in block.transactions.iter().enumerate() {
            ledger.apply_transaction(transaction).map_err(|err| {
                BlockchainError::InvalidBlock(format!("transaction {} rejected: {}", index, err))
            })?;
        }

        Ok(())
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            // a closed receiver means the node is shutting down
            let _ = events.send(event);
        }
    }
}
