//! Shared ledger: the one place where chain and pool are mutated
//!
//! Replication, mining and transaction submission all go through
//! [`SharedLedger`]. Every mutation takes the same write lock, so the
//! length comparison in `replace_chain` and the swap that follows are
//! observed atomically, and a freshly mined block can never interleave with
//! a replacement. Readers get `Arc` snapshots of the chain.

use crate::blockchain::{Block, Blockchain, ChainReplacement};
use crate::error::ChainError;
use crate::mempool::TransactionPool;
use crate::transaction::Transaction;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct LedgerState {
    pub blockchain: Blockchain,
    pub pool: TransactionPool,
}

impl LedgerState {
    /// Prunes mined transactions from the pool.
    fn prune_pool(&mut self) -> usize {
        self.pool.clear_blockchain_transactions(&self.blockchain)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharedLedger {
    inner: Arc<RwLock<LedgerState>>,
}

impl SharedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.inner.write().await
    }

    /// Immutable view of the chain at this instant.
    pub async fn snapshot(&self) -> Arc<Vec<Block>> {
        self.inner.read().await.blockchain.snapshot()
    }

    pub async fn chain_len(&self) -> usize {
        self.inner.read().await.blockchain.len()
    }

    pub async fn pending_transactions(&self) -> Vec<Transaction> {
        self.inner.read().await.pool.transaction_data()
    }

    /// Current tip plus pending transactions: everything needed to mine the
    /// next block without holding the lock.
    pub async fn mining_template(&self) -> (Block, Vec<Transaction>) {
        let state = self.inner.read().await;
        (state.blockchain.tip().clone(), state.pool.transaction_data())
    }

    /// Offers `candidate` to the chain and prunes the pool if it was adopted.
    pub async fn replace_chain(&self, candidate: Vec<Block>) -> ChainReplacement {
        let mut state = self.inner.write().await;
        let outcome = state.blockchain.replace_chain(candidate);
        if outcome.is_replaced() {
            let pruned = state.prune_pool();
            info!(
                length = state.blockchain.len(),
                pruned,
                "ledger.chain_replaced"
            );
        }
        outcome
    }

    /// Appends a locally mined block and prunes the pool.
    pub async fn append_block(&self, block: Block) -> Result<(), ChainError> {
        let mut state = self.inner.write().await;
        state.blockchain.append_block(block)?;
        let pruned = state.prune_pool();
        debug!(length = state.blockchain.len(), pruned, "ledger.block_appended");
        Ok(())
    }

    /// Verifies and stages a transaction. A transaction already recorded on
    /// the chain is refused, so a late broadcast cannot get it mined twice.
    pub async fn set_transaction(&self, tx: Transaction) -> Result<(), ChainError> {
        let mut state = self.inner.write().await;
        if state.blockchain.contains_transaction(&tx.id) {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} is already on the chain",
                tx.id
            )));
        }
        state.pool.set_transaction(tx)
    }
}
