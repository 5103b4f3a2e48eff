//! Wallet: a keypair, its address, and balance derived from the chain

use crate::blockchain::Block;
use crate::crypto::{Address, KeyPair};
use crate::economics::STARTING_BALANCE;
use crate::error::ChainError;
use crate::transaction::Transaction;

#[derive(Debug, Clone)]
pub struct Wallet {
    keypair: KeyPair,
    address: Address,
}

impl Wallet {
    /// Creates a wallet with a freshly generated keypair.
    pub fn new() -> Self {
        Self::from_keypair(KeyPair::generate())
    }

    pub fn from_keypair(keypair: KeyPair) -> Self {
        let address = keypair.address();
        Self { keypair, address }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }

    /// Hex-encoded compact signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Result<String, ChainError> {
        self.keypair.sign_hex(message)
    }

    /// Spendable balance according to `chain`. Recomputed on every call.
    pub fn balance(&self, chain: &[Block]) -> u64 {
        Self::calculate_balance(chain, &self.address)
    }

    /// Builds a signed transaction against the chain-derived balance.
    ///
    /// Pending pool transactions are not consulted: a wallet with an unmined
    /// transaction still sees its last mined balance here.
    pub fn create_transaction(
        &self,
        recipient: &str,
        amount: u64,
        chain: &[Block],
    ) -> Result<Transaction, ChainError> {
        Transaction::new(self, self.balance(chain), recipient, amount)
    }

    /// Walks the chain oldest to newest. A transaction sent by `address`
    /// resets the balance to the change it kept; any other transaction
    /// paying `address` adds to it.
    pub fn calculate_balance(chain: &[Block], address: &str) -> u64 {
        let mut balance = STARTING_BALANCE;

        for transaction in chain.iter().flat_map(|block| block.data.iter()) {
            if transaction.input.address == address {
                balance = transaction.output.get(address).copied().unwrap_or(0);
            } else if let Some(amount) = transaction.output.get(address) {
                balance = balance.saturating_add(*amount);
            }
        }

        balance
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}
