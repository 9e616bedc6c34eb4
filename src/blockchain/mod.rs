// Blockchain module
//
// Consensus core of the node:
// - Transactions and their signatures
// - Account ledger derived from the chain
// - Blocks and the proof of work predicate
// - Transaction pool
// - The chain and its extension rules
// - The parallel miner

pub mod account;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod miner;
pub mod pool;
pub mod transaction;

pub use account::{Account, AccountError, Ledger};
pub use block::{Block, BASE_DIFFICULTY, MAX_TRANSACTIONS_PER_BLOCK};
pub use chain::{BlockSubmitter, Blockchain, BlockchainError};
pub use crypto::{Address, DigitalSignature, Wallet};
pub use pool::TransactionPool;
pub use transaction::{Transaction, TransactionError, COINBASE_REWARD};
