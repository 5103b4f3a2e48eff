use crate::economics::adjust_difficulty;
use crate::error::ChainError;
use crate::transaction::Transaction;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

use super::validation::{is_valid_chain, leading_zero_bits, validate_block};

pub const GENESIS_TIMESTAMP: u64 = 1;
pub const GENESIS_LAST_HASH: &str = "genesis_last_hash";
pub const GENESIS_HASH: &str = "genesis_hash";
pub const GENESIS_DIFFICULTY: u32 = 3;

/// Milliseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub last_hash: String,
    pub hash: String,
    pub data: Vec<Transaction>,
    pub difficulty: u32,
    pub nonce: u64,
}

impl Block {
    /// The fixed first block shared by every node.
    pub fn genesis() -> Self {
        Block {
            index: 0,
            timestamp: GENESIS_TIMESTAMP,
            last_hash: GENESIS_LAST_HASH.to_string(),
            hash: GENESIS_HASH.to_string(),
            data: Vec::new(),
            difficulty: GENESIS_DIFFICULTY,
            nonce: 0,
        }
    }

    /// Mines a successor of `last_block` carrying `data`.
    ///
    /// Timestamp and difficulty are re-sampled on every attempt, so a search
    /// that runs past the mine rate relaxes its own target.
    pub fn mine(last_block: &Block, data: Vec<Transaction>) -> Self {
        let data_bytes = encode_data(&data);
        let mut nonce: u64 = 0;

        loop {
            nonce = nonce.wrapping_add(1);
            let timestamp = current_timestamp();
            let difficulty =
                adjust_difficulty(last_block.difficulty, last_block.timestamp, timestamp);
            let digest = digest(timestamp, &last_block.hash, &data_bytes, difficulty, nonce);

            if leading_zero_bits(&digest) >= difficulty {
                return Block {
                    index: last_block.index + 1,
                    timestamp,
                    last_hash: last_block.hash.clone(),
                    hash: hex::encode(digest),
                    data,
                    difficulty,
                    nonce,
                };
            }
        }
    }

    /// Hex hash of `(timestamp, last_hash, data, difficulty, nonce)`.
    pub fn calculate_hash(
        timestamp: u64,
        last_hash: &str,
        data: &[Transaction],
        difficulty: u32,
        nonce: u64,
    ) -> String {
        hex::encode(digest(
            timestamp,
            last_hash,
            &encode_data(data),
            difficulty,
            nonce,
        ))
    }

    /// Recomputes this block's hash from its fields.
    pub fn compute_hash(&self) -> String {
        Self::calculate_hash(
            self.timestamp,
            &self.last_hash,
            &self.data,
            self.difficulty,
            self.nonce,
        )
    }

    pub fn transaction_ids(&self) -> impl Iterator<Item = &str> {
        self.data.iter().map(|tx| tx.id.as_str())
    }
}

fn encode_data(data: &[Transaction]) -> Vec<u8> {
    // Only string-keyed maps, strings and integers: serialization cannot fail.
    serde_json::to_vec(data).unwrap_or_default()
}

fn digest(timestamp: u64, last_hash: &str, data: &[u8], difficulty: u32, nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_le_bytes());
    hasher.update((last_hash.len() as u64).to_le_bytes());
    hasher.update(last_hash.as_bytes());
    hasher.update(data);
    hasher.update(difficulty.to_le_bytes());
    hasher.update(nonce.to_le_bytes());
    hasher.finalize().into()
}

/// Result of offering a candidate chain to [`Blockchain::replace_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainReplacement {
    /// The candidate was adopted. Carries the transaction ids it introduced.
    Replaced { new_transaction_ids: HashSet<String> },
    /// The candidate was not strictly longer; nothing to do.
    AlreadyCurrent {
        local_length: usize,
        candidate_length: usize,
    },
    /// The candidate failed validation and was discarded.
    Invalid(ChainError),
}

impl ChainReplacement {
    pub fn is_replaced(&self) -> bool {
        matches!(self, ChainReplacement::Replaced { .. })
    }
}

/// Append-only chain of blocks starting at the genesis block.
///
/// Blocks sit behind an `Arc` so readers can hold a snapshot while the chain
/// is extended or replaced underneath them.
#[derive(Debug, Clone)]
pub struct Blockchain {
    chain: Arc<Vec<Block>>,
}

impl Blockchain {
    pub fn new() -> Self {
        Blockchain {
            chain: Arc::new(vec![Block::genesis()]),
        }
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    /// Cheap immutable view of the current chain.
    pub fn snapshot(&self) -> Arc<Vec<Block>> {
        Arc::clone(&self.chain)
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Always false: the genesis block is never removed.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn tip(&self) -> &Block {
        &self.chain[self.chain.len() - 1]
    }

    /// Mines `data` on top of the current tip and appends the result.
    pub fn add_block(&mut self, data: Vec<Transaction>) -> &Block {
        let block = Block::mine(self.tip(), data);
        let chain = Arc::make_mut(&mut self.chain);
        chain.push(block);
        &chain[chain.len() - 1]
    }

    /// Appends a block mined elsewhere. Fails with `InvalidBlockLinkage` if
    /// the tip moved since the block was started.
    pub fn append_block(&mut self, block: Block) -> Result<(), ChainError> {
        let tip = self.tip();
        if block.last_hash != tip.hash || block.index != tip.index + 1 {
            return Err(ChainError::InvalidBlockLinkage);
        }
        validate_block(tip, &block)?;
        Arc::make_mut(&mut self.chain).push(block);
        Ok(())
    }

    pub fn is_valid_chain(chain: &[Block]) -> Result<(), ChainError> {
        is_valid_chain(chain)
    }

    /// Adopts `candidate` only if it is strictly longer than the current
    /// chain and fully valid. Length never decreases.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> ChainReplacement {
        if candidate.len() <= self.chain.len() {
            return ChainReplacement::AlreadyCurrent {
                local_length: self.chain.len(),
                candidate_length: candidate.len(),
            };
        }

        if let Err(e) = is_valid_chain(&candidate) {
            return ChainReplacement::Invalid(e);
        }

        let known = self.transaction_ids();
        let new_transaction_ids = candidate
            .iter()
            .flat_map(Block::transaction_ids)
            .filter(|id| !known.contains(id))
            .map(str::to_string)
            .collect();

        self.chain = Arc::new(candidate);
        ChainReplacement::Replaced {
            new_transaction_ids,
        }
    }

    pub fn contains_transaction(&self, id: &str) -> bool {
        self.chain
            .iter()
            .any(|block| block.transaction_ids().any(|known| known == id))
    }

    /// Every transaction id recorded anywhere on the chain.
    pub fn transaction_ids(&self) -> HashSet<&str> {
        self.chain.iter().flat_map(Block::transaction_ids).collect()
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}
