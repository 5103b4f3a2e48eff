/// Transaction types for MeshLedger
use crate::blockchain::current_timestamp;
use crate::crypto::Address;
use crate::economics::{MINING_REWARD, MINING_REWARD_ADDRESS};
use crate::error::ChainError;
use crate::wallet::Wallet;
use std::collections::BTreeMap;

/// Recipient address to credited amount. Ordered so its JSON form, which is
/// what gets signed, is the same on every node.
pub type TransactionOutput = BTreeMap<Address, u64>;

/// Who is spending, what they held when signing, and their proof.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransactionInput {
    pub timestamp: u64,
    /// Sender's balance at signing time.
    pub amount: u64,
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// A signed value transfer, or a miner reward.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub id: String,
    pub input: TransactionInput,
    pub output: TransactionOutput,
}

fn new_transaction_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

impl Transaction {
    /// Builds and signs a transfer of `amount` from `sender` to `recipient`,
    /// with `balance` as the sender's spendable funds. The sender keeps the
    /// change as a second output.
    pub fn new(
        sender: &Wallet,
        balance: u64,
        recipient: &str,
        amount: u64,
    ) -> Result<Self, ChainError> {
        if amount > balance {
            return Err(ChainError::InsufficientFunds {
                requested: amount,
                available: balance,
            });
        }
        if recipient == sender.address() {
            return Err(ChainError::InvalidTransaction(
                "Sender and recipient cannot be the same".to_string(),
            ));
        }

        let mut output = TransactionOutput::new();
        output.insert(recipient.to_string(), amount);
        output.insert(sender.address().to_string(), balance - amount);

        let input = Self::signed_input(sender, balance, &output)?;
        Ok(Transaction {
            id: new_transaction_id(),
            input,
            output,
        })
    }

    /// Amends a pending transaction from the same sender with another
    /// payment, taken out of the sender's remaining change, and re-signs it.
    pub fn update(&mut self, sender: &Wallet, recipient: &str, amount: u64) -> Result<(), ChainError> {
        if self.input.address != sender.address() {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} belongs to {}, not {}",
                self.id,
                self.input.address,
                sender.address()
            )));
        }
        if recipient == sender.address() {
            return Err(ChainError::InvalidTransaction(
                "Sender and recipient cannot be the same".to_string(),
            ));
        }

        let change = self.output.get(sender.address()).copied().unwrap_or(0);
        if amount > change {
            return Err(ChainError::InsufficientFunds {
                requested: amount,
                available: change,
            });
        }

        *self.output.entry(recipient.to_string()).or_insert(0) += amount;
        self.output.insert(sender.address().to_string(), change - amount);

        self.input = Self::signed_input(sender, self.input.amount, &self.output)?;
        Ok(())
    }

    /// Fixed-reward transaction crediting `miner`; carries no signature.
    pub fn reward_transaction(miner: &Wallet) -> Self {
        let mut output = TransactionOutput::new();
        output.insert(miner.address().to_string(), MINING_REWARD);

        Transaction {
            id: new_transaction_id(),
            input: TransactionInput {
                timestamp: current_timestamp(),
                amount: MINING_REWARD,
                address: MINING_REWARD_ADDRESS.to_string(),
                public_key: None,
                signature: None,
            },
            output,
        }
    }

    pub fn is_reward(&self) -> bool {
        self.input.address == MINING_REWARD_ADDRESS
    }

    /// Bytes covered by the sender's signature: the canonical JSON of `output`.
    pub fn signable_message(output: &TransactionOutput) -> Result<Vec<u8>, ChainError> {
        Ok(serde_json::to_vec(output)?)
    }

    /// Sum of all outputs, or `None` if it does not fit in a u64.
    pub fn total_output(&self) -> Option<u64> {
        self.output
            .values()
            .try_fold(0u64, |acc, value| acc.checked_add(*value))
    }

    fn signed_input(
        sender: &Wallet,
        balance: u64,
        output: &TransactionOutput,
    ) -> Result<TransactionInput, ChainError> {
        Ok(TransactionInput {
            timestamp: current_timestamp(),
            amount: balance,
            address: sender.address().to_string(),
            public_key: Some(sender.public_key_hex()),
            signature: Some(sender.sign(&Self::signable_message(output)?)?),
        })
    }
}
