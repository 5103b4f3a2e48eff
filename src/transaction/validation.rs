/// Validation logic for transactions separated from type definitions
use crate::crypto::verify_signature_hex;
use crate::economics::MINING_REWARD;
use crate::error::ChainError;
use crate::transaction::types::Transaction;

impl Transaction {
    /// Checks that outputs add up to the input amount and that the signature
    /// over `output` verifies under `input.public_key`. Reward transactions
    /// instead must pay exactly one recipient the fixed reward.
    pub fn is_valid(&self) -> Result<(), ChainError> {
        if self.is_reward() {
            return self.validate_reward();
        }

        let total = self.total_output().ok_or_else(|| {
            ChainError::InvalidTransaction(format!("Transaction {} output total overflows", self.id))
        })?;
        if total != self.input.amount {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} outputs sum to {} but input amount is {}",
                self.id, total, self.input.amount
            )));
        }

        let (public_key, signature) = match (&self.input.public_key, &self.input.signature) {
            (Some(pk), Some(sig)) => (pk, sig),
            _ => {
                return Err(ChainError::InvalidTransaction(format!(
                    "Transaction {} is not signed",
                    self.id
                )))
            }
        };

        let message = Self::signable_message(&self.output)?;
        verify_signature_hex(public_key, &message, signature).map_err(|e| {
            ChainError::InvalidTransaction(format!("Transaction {}: {}", self.id, e))
        })
    }

    fn validate_reward(&self) -> Result<(), ChainError> {
        let mut amounts = self.output.values();
        match (amounts.next(), amounts.next()) {
            (Some(&amount), None) if amount == MINING_REWARD => Ok(()),
            _ => Err(ChainError::InvalidTransaction(format!(
                "Reward transaction {} must credit a single miner exactly {}",
                self.id, MINING_REWARD
            ))),
        }
    }
}
