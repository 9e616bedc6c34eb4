//! Parallel proof of work search.
//!
//! A mining round fans a stream of nonces out to one worker thread per CPU
//! core. The coordinator keeps the workers fed while it watches two inputs:
//! blocks found by its own workers and blocks submitted by peers. Whichever
//! valid block it sees first ends the round. Workers are stopped by raising a
//! shared flag and closing the nonce channel; a worker finishes at most the
//! hash it is computing.

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{
    self,
    error::{TryRecvError, TrySendError},
    UnboundedReceiver, UnboundedSender,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::block::{meets_difficulty, Block, MAX_TRANSACTIONS_PER_BLOCK};
use super::chain::{Blockchain, BlockchainError};
use super::transaction::Transaction;

/// Nonces buffered per worker before the coordinator has to wait
const NONCES_PER_WORKER: usize = 64;

type NonceQueue = Arc<Mutex<mpsc::Receiver<u64>>>;

/// Worker threads searching nonces for a single candidate block
struct WorkerPool {
    nonces: Option<mpsc::Sender<u64>>,
    cancelled: Arc<AtomicBool>,
    results: UnboundedReceiver<Block>,
    workers: Vec<JoinHandle<u64>>,
}

impl WorkerPool {
    fn spawn(candidate: &Block, difficulty: u32, size: usize) -> Result<Self, BlockchainError> {
        let (nonce_sender, nonce_receiver) = mpsc::channel(size * NONCES_PER_WORKER);
        let nonce_receiver: NonceQueue = Arc::new(Mutex::new(nonce_receiver));
        let (result_sender, results) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let mut pool = WorkerPool {
            nonces: Some(nonce_sender),
            cancelled: Arc::clone(&cancelled),
            results,
            workers: Vec::with_capacity(size),
        };
        for id in 0..size {
            let candidate = candidate.clone();
            let nonces = Arc::clone(&nonce_receiver);
            let cancelled = Arc::clone(&cancelled);
            let results = result_sender.clone();
            let worker = thread::Builder::new()
                .name(format!("miner-{}", id))
                .spawn(move || search(candidate, difficulty, nonces, cancelled, results))
                .map_err(|e| BlockchainError::SystemError(e.to_string()))?;
            pool.workers.push(worker);
        }

        Ok(pool)
    }

    fn offer(&self, nonce: u64) -> Result<(), TrySendError<u64>> {
        match &self.nonces {
            Some(nonces) => nonces.try_send(nonce),
            None => Err(TrySendError::Closed(nonce)),
        }
    }

    fn try_result(&mut self) -> Result<Block, TryRecvError> {
        self.results.try_recv()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // buffered nonces are still delivered after close, the flag makes workers skip them
        self.cancelled.store(true, Ordering::Release);
        self.nonces.take();

        let mut hashes = 0;
        for worker in self.workers.drain(..) {
            match worker.join() {
                Ok(count) => hashes += count,
                Err(_) => error!("Mining worker panicked"),
            }
        }
        debug!("Mining workers stopped after {} hashes", hashes);
    }
}

/// Hashes `candidate` with every nonce it receives until one meets the
/// difficulty or the round is cancelled.
///
/// # Returns
///
/// The number of hashes computed
fn search(
    mut candidate: Block,
    difficulty: u32,
    nonces: NonceQueue,
    cancelled: Arc<AtomicBool>,
    results: UnboundedSender<Block>,
) -> u64 {
    let mut hashes = 0;
    loop {
        let nonce = {
            let mut queue = match nonces.lock() {
                Ok(queue) => queue,
                Err(_) => return hashes,
            };
            match queue.blocking_recv() {
                Some(nonce) => nonce,
                None => return hashes,
            }
        };
        if cancelled.load(Ordering::Acquire) {
            return hashes;
        }

        candidate.nonce = nonce;
        let hash = candidate.compute_hash();
        hashes += 1;
        if meets_difficulty(&hash, difficulty) {
            candidate.hash = hash;
            // the coordinator may already have finished the round
            let _ = results.send(candidate);
            return hashes;
        }
    }
}

impl Blockchain {
    /// Mines the next block, or adopts a peer's block if one arrives first.
    ///
    /// # Returns
    ///
    /// * `Result<Block, BlockchainError>` - The new chain tip, whoever mined it.
    ///   Fails only if the worker threads cannot be started or the mined
    ///   block is rejected.
    ///
    /// # Panics
    ///
    /// Panics if every nonce has been tried without success, or if every
    /// worker exited without reporting, both of which mean the proof of work
    /// predicate is broken.
    pub fn mine_block(&mut self) -> Result<Block, BlockchainError> {
        let previous = self.last_block().clone();
        let transactions = self.transactions_for_next_block();
        let candidate = Block::new(previous.number + 1, previous.hash, transactions, 0);
        let workers = num_cpus::get().max(1);

        info!(
            "Mining block {} with {} transactions on {} workers",
            candidate.number,
            candidate.transactions.len(),
            workers
        );

        let mut pool = WorkerPool::spawn(&candidate, self.difficulty(), workers)?;
        let mut nonces = 0..=u64::MAX;
        let mut next_nonce = nonces.next();

        loop {
            if let Some(block) = self.next_external_block() {
                let number = block.number;
                match self.add_block(block) {
                    Ok(()) => {
                        drop(pool);
                        info!("Peer won the race for block {}", number);
                        return Ok(self.last_block().clone());
                    }
                    Err(err) => warn!("Rejected external block {}: {}", number, err),
                }
            }

            match pool.try_result() {
                Ok(block) => {
                    drop(pool);
                    self.add_block(block)?;
                    return Ok(self.last_block().clone());
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    error!("All mining workers exited without a block");
                    panic!("mining workers exited without finding block {}", candidate.number);
                }
            }

            match next_nonce {
                Some(nonce) => match pool.offer(nonce) {
                    Ok(()) => next_nonce = nonces.next(),
                    Err(TrySendError::Full(_)) => thread::yield_now(),
                    // surfaces as a disconnected result channel on the next pass
                    Err(TrySendError::Closed(_)) => {}
                },
                None => {
                    error!("Nonce space exhausted for block {}", candidate.number);
                    panic!("exhausted every nonce for block {}", candidate.number);
                }
            }
        }
    }

    /// A coinbase paying this node followed by every pooled transaction that
    /// still applies on top of the chain, in pool order.
    fn transactions_for_next_block(&mut self) -> Vec<Transaction> {
        let mut ledger = self.ledger();

        let evicted = self.pool_mut().evict_stale(&ledger);
        if evicted > 0 {
            debug!("Evicted {} stale transactions from the pool", evicted);
        }

        let coinbase = Transaction::coinbase_to(self.wallet().address().clone());
        if let Err(err) = ledger.apply_transaction(&coinbase) {
            error!("Coinbase transaction rejected: {}", err);
        }

        let mut transactions = vec![coinbase];
        for transaction in self.pool().pending() {
            if transactions.len() >= MAX_TRANSACTIONS_PER_BLOCK {
                break;
            }
            match ledger.apply_transaction(transaction) {
                Ok(()) => transactions.push(transaction.clone()),
                Err(err) => debug!("Leaving {} in the pool: {}", transaction, err),
            }
        }
        transactions
    }
}
