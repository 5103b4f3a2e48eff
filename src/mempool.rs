//! Transaction pool: signed transactions waiting to be mined

use crate::blockchain::Blockchain;
use crate::error::ChainError;
use crate::transaction::Transaction;
use std::collections::HashMap;
use tracing::debug;

/// Pending transactions keyed by id, holding at most one per sender.
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    transactions: HashMap<String, Transaction>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies and stages `tx`, overwriting any entry with the same id.
    /// A different pending transaction from the same sender is superseded.
    pub fn set_transaction(&mut self, tx: Transaction) -> Result<(), ChainError> {
        if tx.is_reward() {
            return Err(ChainError::InvalidTransaction(format!(
                "Reward transaction {} cannot be pooled",
                tx.id
            )));
        }
        tx.is_valid()?;

        let sender = tx.input.address.clone();
        let id = tx.id.clone();
        self.transactions.retain(|existing_id, existing| {
            let superseded = existing.input.address == sender && *existing_id != id;
            if superseded {
                debug!(superseded = %existing_id, by = %id, "mempool.supersede");
            }
            !superseded
        });
        self.transactions.insert(id, tx);
        Ok(())
    }

    /// The pending transaction sent by `address`, if any.
    pub fn existing_transaction(&self, address: &str) -> Option<&Transaction> {
        self.transactions
            .values()
            .find(|tx| tx.input.address == address)
    }

    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    /// All pending transactions, oldest signature first.
    pub fn transaction_data(&self) -> Vec<Transaction> {
        let mut data: Vec<Transaction> = self.transactions.values().cloned().collect();
        data.sort_by(|a, b| {
            a.input
                .timestamp
                .cmp(&b.input.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        data
    }

    /// Drops every pending transaction already recorded on `blockchain`.
    /// Returns how many were removed; calling it again removes nothing.
    pub fn clear_blockchain_transactions(&mut self, blockchain: &Blockchain) -> usize {
        let before = self.transactions.len();
        for block in blockchain.chain() {
            for id in block.transaction_ids() {
                self.transactions.remove(id);
            }
        }
        before - self.transactions.len()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
