use crate::blockchain::{Block, Transaction};

/// Everything the node reacts to outside of consensus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A block was appended to the local chain
    NewBlock(Block),

    /// A transaction entered the local pool
    NewTransaction(Transaction),

    /// A peer greeted this node with its advertised address
    NewPeer(String),
}
