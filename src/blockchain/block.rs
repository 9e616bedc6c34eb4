use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use std::fmt;

use super::transaction::Transaction;

/// Upper bound on transactions in a block, coinbase included
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 64;

/// A block hash must have more than this many leading zero bits
pub const BASE_DIFFICULTY: u32 = 20;

const GENESIS_NONCE: u64 = 3_999_606_801_082_803_789;

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Height of the block, the genesis block is 0
    pub number: u64,

    /// Time the block was assembled
    #[schema(value_type = String, example = "2021-05-01T06:00:00Z")]
    pub time: DateTime<Utc>,

    /// Transactions in the block, the first one is always a coinbase transaction
    pub transactions: Vec<Transaction>,

    /// Proof of work solution
    pub nonce: u64,

    /// Hash of the previous block
    #[serde(with = "hex::serde")]
    #[schema(value_type = String)]
    pub previous_hash: Vec<u8>,

    /// SHA-256 hash of all the other fields
    #[serde(with = "hex::serde")]
    #[schema(value_type = String)]
    pub hash: Vec<u8>,
}

/// Everything in a block except the hash itself
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockHeader<'a> {
    number: u64,
    time: &'a DateTime<Utc>,
    transactions: &'a [Transaction],
    nonce: u64,
    #[serde(with = "hex::serde")]
    previous_hash: &'a [u8],
}

impl Block {
    /// Creates a new block stamped with the current time
    pub fn new(
        number: u64,
        previous_hash: Vec<u8>,
        transactions: Vec<Transaction>,
        nonce: u64,
    ) -> Self {
        let mut block = Block {
            number,
            time: Utc::now(),
            transactions,
            nonce,
            previous_hash,
            hash: Vec::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// The fixed first block of every chain
    pub fn genesis() -> Self {
        let time = Utc
            .with_ymd_and_hms(2021, 5, 1, 6, 0, 0)
            .single()
            .expect("genesis timestamp is a valid UTC instant");
        let mut block = Block {
            number: 0,
            time,
            transactions: Vec::new(),
            nonce: GENESIS_NONCE,
            previous_hash: Vec::new(),
            hash: Vec::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Computes the SHA-256 hash of the block, excluding the hash field
    pub fn compute_hash(&self) -> Vec<u8> {
        let header = BlockHeader {
            number: self.number,
            time: &self.time,
            transactions: &self.transactions,
            nonce: self.nonce,
            previous_hash: &self.previous_hash,
        };
        // Plain in-memory data always encodes; failing here means a broken Serialize impl.
        let bytes = serde_json::to_vec(&header).expect("block header must be serializable");

        Sha256::digest(bytes).to_vec()
    }

    /// Whether the stored hash matches the block contents
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Proof of work predicate: the first 64 bits of the hash, read as a
/// big-endian integer, have more than `difficulty` leading zeros.
pub fn meets_difficulty(hash: &[u8], difficulty: u32) -> bool {
    let prefix: [u8; 8] = match hash.get(..8).and_then(|bytes| bytes.try_into().ok()) {
        Some(prefix) => prefix,
        None => return false,
    };
    u64::from_be_bytes(prefix).leading_zeros() > difficulty
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block {} {} transactions: {}",
            self.number,
            hex::encode(&self.hash),
            self.transactions.len()
        )
    }
}
