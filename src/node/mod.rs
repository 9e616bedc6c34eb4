// Node module
//
// Runs the consensus core next to the HTTP boundary:
// - a dedicated thread owns the Blockchain and mines forever
// - a dispatcher task consumes chain events, updates the read cache and
//   propagates blocks and transactions to peers
// - the API only talks to the queues and the cache

pub mod cache;
pub mod peers;

pub use cache::BlockCache;
pub use peers::{PeerError, PeerGreeting, Peers};

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::blockchain::{BlockSubmitter, Blockchain, BlockchainError, Transaction, Wallet};
use crate::config::Config;
use crate::events::Event;

/// Capacity of the queue of transactions waiting for the consensus thread
const TRANSACTION_QUEUE: usize = 256;

/// Pause after a failed mining round before trying again
const MINING_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Everything the HTTP handlers need to reach the running node
#[derive(Debug, Clone)]
pub struct NodeState {
    /// Snapshot of the chain for reads
    pub cache: Arc<BlockCache>,

    /// Entry point for blocks received from peers
    pub blocks: BlockSubmitter,

    /// Entry point for transactions received from clients and peers
    pub transactions: mpsc::Sender<Transaction>,

    /// Node events, used to announce greeting peers
    pub events: UnboundedSender<Event>,
}

/// A node mining with `wallet`, configured by `config`
pub struct Node {
    config: Config,
    wallet: Wallet,
}

impl Node {
    pub fn new(config: Config, wallet: Wallet) -> Self {
        Node { config, wallet }
    }

    /// Synchronizes with the seed node, then starts mining and dispatching events.
    ///
    /// Must be called from within the actix runtime.
    pub async fn start(self) -> Result<NodeState, BlockchainError> {
        let (events, event_receiver) = mpsc::unbounded_channel();
        let mut chain = Blockchain::new(self.wallet).with_events(events.clone());
        let peers = Peers::new(self.config.advertised_host.clone())
            .map_err(|e| BlockchainError::SystemError(e.to_string()))?;
        let peers = Arc::new(peers);

        if let Some(seed) = &self.config.seed_host {
            bootstrap(&mut chain, &peers, seed).await;
        }

        let cache = Arc::new(BlockCache::new(chain.blocks()));
        let (transactions, transaction_receiver) = mpsc::channel(TRANSACTION_QUEUE);
        let state = NodeState {
            cache: Arc::clone(&cache),
            blocks: chain.block_submitter(),
            transactions,
            events,
        };

        thread::Builder::new()
            .name("consensus".to_string())
            .spawn(move || run_consensus(chain, transaction_receiver))
            .map_err(|e| BlockchainError::SystemError(e.to_string()))?;
        actix_web::rt::spawn(dispatch(event_receiver, cache, peers));

        Ok(state)
    }
}

/// Greets the seed node and imports its chain. Failures leave the node on its own chain.
async fn bootstrap(chain: &mut Blockchain, peers: &Peers, seed: &str) {
    if let Err(err) = peers.greet(seed).await {
        warn!("Seed node {} did not answer the greeting: {}", seed, err);
        return;
    }
    info!("Registered seed node {}", seed);

    match peers.fetch_blocks(seed).await {
        Ok(blocks) => {
            if let Err(err) = chain.import_blocks(blocks) {
                warn!("Stopped importing blocks from {}: {}", seed, err);
            }
        }
        Err(err) => warn!("Failed to fetch blocks from {}: {}", seed, err),
    }
}

/// The single owner of the chain: pools queued transactions, then mines.
fn run_consensus(mut chain: Blockchain, mut transactions: mpsc::Receiver<Transaction>) {
    info!("Mining rewards go to {}", chain.wallet().address());
    loop {
        while let Ok(transaction) = transactions.try_recv() {
            if let Err(err) = chain.add_transaction(transaction) {
                warn!("Rejected transaction: {}", err);
            }
        }

        match chain.mine_block() {
            Ok(block) => debug!("Chain tip is now {}", block),
            Err(err) => {
                error!("Mining round failed: {}", err);
                thread::sleep(MINING_RETRY_DELAY);
            }
        }
    }
}

/// Reacts to node events in the order they were emitted.
///
/// Cache updates and peer registration happen inline; broadcasts run on
/// their own tasks so a slow peer never holds back the next event.
async fn dispatch(
    mut events: UnboundedReceiver<Event>,
    cache: Arc<BlockCache>,
    peers: Arc<Peers>,
) {
    while let Some(event) = events.recv().await {
        match event {
            Event::NewBlock(block) => {
                cache.add_block(block.clone());
                let peers = Arc::clone(&peers);
                actix_web::rt::spawn(async move { peers.broadcast_block(&block).await });
            }
            Event::NewTransaction(transaction) => {
                let peers = Arc::clone(&peers);
                actix_web::rt::spawn(async move {
                    peers.broadcast_transaction(&transaction).await
                });
            }
            Event::NewPeer(address) => {
                if peers.register(address.clone()) {
                    info!("Registered peer {}", address);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Block;
    use std::net::TcpListener;

    fn reward_block(number: u64, previous: &Block, miner: &Wallet) -> Block {
        Block::new(
            number,
            previous.hash.clone(),
            vec![Transaction::coinbase_to(miner.address().clone())],
            0,
        )
    }

    #[actix_web::test]
    async fn test_dispatch_updates_cache_and_peers() {
        let (events, receiver) = mpsc::unbounded_channel();
        let cache = Arc::new(BlockCache::new(&[Block::genesis()]));
        let peers = Arc::new(Peers::new("node-a:8000".to_string()).unwrap());
        let miner = Wallet::new().unwrap();
        let block = reward_block(1, &Block::genesis(), &miner);

        events.send(Event::NewPeer("node-b:8000".to_string())).unwrap();
        events.send(Event::NewPeer("node-a:8000".to_string())).unwrap();
        drop(events);
        dispatch(receiver, Arc::clone(&cache), Arc::clone(&peers)).await;

        assert_eq!(peers.hosts(), vec!["node-b:8000".to_string()]);

        // with no reachable peers a new block still lands in the cache
        let (events, receiver) = mpsc::unbounded_channel();
        let lonely = Arc::new(Peers::new("node-a:8000".to_string()).unwrap());
        events.send(Event::NewBlock(block.clone())).unwrap();
        drop(events);
        dispatch(receiver, Arc::clone(&cache), lonely).await;

        assert_eq!(cache.last_block(), Some(block));
    }

    #[actix_web::test]
    async fn test_silent_peer_does_not_stall_dispatch() {
        // accepts connections and never answers
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let silent = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let mut open = Vec::new();
            for stream in listener.incoming().flatten() {
                open.push(stream);
            }
        });

        let cache = Arc::new(BlockCache::new(&[Block::genesis()]));
        let peers = Arc::new(Peers::new("node-a:8000".to_string()).unwrap());
        assert!(peers.register(silent));
        let miner = Wallet::new().unwrap();
        let first = reward_block(1, &Block::genesis(), &miner);
        let second = reward_block(2, &first, &miner);

        let (events, receiver) = mpsc::unbounded_channel();
        events.send(Event::NewBlock(first)).unwrap();
        events.send(Event::NewBlock(second.clone())).unwrap();
        events.send(Event::NewPeer("node-c:8000".to_string())).unwrap();
        drop(events);

        let dispatched = tokio::time::timeout(
            Duration::from_secs(2),
            dispatch(receiver, Arc::clone(&cache), Arc::clone(&peers)),
        )
        .await;

        assert!(dispatched.is_ok());
        assert_eq!(cache.blocks().len(), 3);
        assert_eq!(cache.last_block(), Some(second));
        assert!(peers.hosts().contains(&"node-c:8000".to_string()));
    }
}
