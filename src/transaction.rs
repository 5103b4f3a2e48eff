//! Transaction module split into types and validation for better modularity

pub mod types;
pub mod validation;

pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economics::{MINING_REWARD, MINING_REWARD_ADDRESS, STARTING_BALANCE};
    use crate::error::ChainError;
    use crate::wallet::Wallet;

    #[test]
    fn test_new_transaction_splits_change() {
        let sender = Wallet::new();
        let tx = Transaction::new(&sender, STARTING_BALANCE, "recipient", 200).unwrap();

        assert_eq!(tx.output["recipient"], 200);
        assert_eq!(tx.output[sender.address()], 800);
        assert_eq!(tx.input.amount, STARTING_BALANCE);
        assert_eq!(tx.input.address, sender.address());
        assert!(tx.is_valid().is_ok());
    }

    #[test]
    fn test_new_transaction_exceeding_balance_fails() {
        let sender = Wallet::new();
        let err = Transaction::new(&sender, 100, "recipient", 101).unwrap_err();
        assert_eq!(
            err,
            ChainError::InsufficientFunds {
                requested: 101,
                available: 100
            }
        );
    }

    #[test]
    fn test_self_payment_is_rejected() {
        let sender = Wallet::new();
        let own = sender.address().to_string();
        assert!(matches!(
            Transaction::new(&sender, 100, &own, 10),
            Err(ChainError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_tampered_output_fails_validation() {
        let sender = Wallet::new();
        let mut tx = Transaction::new(&sender, STARTING_BALANCE, "recipient", 200).unwrap();
        tx.output.insert(sender.address().to_string(), 9000);
        assert!(tx.is_valid().is_err());
    }

    #[test]
    fn test_forged_signature_fails_validation() {
        let sender = Wallet::new();
        let forger = Wallet::new();
        let mut tx = Transaction::new(&sender, STARTING_BALANCE, "recipient", 200).unwrap();
        tx.input.signature = Some(forger.sign(b"something else").unwrap());
        assert!(tx.is_valid().is_err());
    }

    #[test]
    fn test_unsigned_transaction_fails_validation() {
        let sender = Wallet::new();
        let mut tx = Transaction::new(&sender, STARTING_BALANCE, "recipient", 200).unwrap();
        tx.input.signature = None;
        assert!(tx
            .is_valid()
            .unwrap_err()
            .to_string()
            .contains("not signed"));
    }

    #[test]
    fn test_update_adds_new_recipient() {
        let sender = Wallet::new();
        let mut tx = Transaction::new(&sender, STARTING_BALANCE, "first", 200).unwrap();
        let original_id = tx.id.clone();

        tx.update(&sender, "second", 300).unwrap();

        assert_eq!(tx.id, original_id);
        assert_eq!(tx.output["first"], 200);
        assert_eq!(tx.output["second"], 300);
        assert_eq!(tx.output[sender.address()], 500);
        assert!(tx.is_valid().is_ok());
    }

    #[test]
    fn test_update_existing_recipient_accumulates() {
        let sender = Wallet::new();
        let mut tx = Transaction::new(&sender, STARTING_BALANCE, "first", 200).unwrap();
        tx.update(&sender, "first", 50).unwrap();

        assert_eq!(tx.output["first"], 250);
        assert_eq!(tx.output[sender.address()], 750);
        assert!(tx.is_valid().is_ok());
    }

    #[test]
    fn test_update_beyond_change_fails() {
        let sender = Wallet::new();
        let mut tx = Transaction::new(&sender, STARTING_BALANCE, "first", 200).unwrap();
        let before = tx.clone();

        let err = tx.update(&sender, "second", 900).unwrap_err();
        assert_eq!(
            err,
            ChainError::InsufficientFunds {
                requested: 900,
                available: 800
            }
        );
        assert_eq!(tx, before);
    }

    #[test]
    fn test_update_by_other_wallet_fails() {
        let sender = Wallet::new();
        let other = Wallet::new();
        let mut tx = Transaction::new(&sender, STARTING_BALANCE, "first", 200).unwrap();
        assert!(matches!(
            tx.update(&other, "second", 10),
            Err(ChainError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_reward_transaction() {
        let miner = Wallet::new();
        let reward = Transaction::reward_transaction(&miner);

        assert!(reward.is_reward());
        assert_eq!(reward.input.address, MINING_REWARD_ADDRESS);
        assert_eq!(reward.output.len(), 1);
        assert_eq!(reward.output[miner.address()], MINING_REWARD);
        assert!(reward.input.signature.is_none());
        assert!(reward.is_valid().is_ok());
    }

    #[test]
    fn test_inflated_reward_is_invalid() {
        let miner = Wallet::new();
        let mut reward = Transaction::reward_transaction(&miner);
        reward.output.insert(miner.address().to_string(), MINING_REWARD * 10);
        assert!(reward.is_valid().is_err());
    }

    #[test]
    fn test_json_preserves_large_integers() {
        let sender = Wallet::new();
        let mut tx = Transaction::new(&sender, u64::MAX, "whale", u64::MAX - 1).unwrap();
        tx.input.timestamp = u64::MAX;

        let json = serde_json::to_string(&tx).unwrap();
        let decoded: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.output["whale"], u64::MAX - 1);
        assert!(decoded.is_valid().is_ok());
    }

    #[test]
    fn test_overflowing_output_is_invalid() {
        let sender = Wallet::new();
        let mut tx = Transaction::new(&sender, 10, "a", 5).unwrap();
        tx.output.insert("b".to_string(), u64::MAX);
        assert!(tx
            .is_valid()
            .unwrap_err()
            .to_string()
            .contains("overflows"));
    }
}
