use crate::error::ChainError;

use super::chain::Block;

/// Number of leading zero bits in `bytes`, read most significant bit first.
pub fn leading_zero_bits(bytes: &[u8]) -> u32 {
    let mut zeros = 0;
    for byte in bytes {
        if *byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros();
            break;
        }
    }
    zeros
}

/// Whether a hex-encoded hash has at least `difficulty` leading zero bits.
/// Malformed hex never satisfies any difficulty.
pub fn hash_meets_difficulty(hash_hex: &str, difficulty: u32) -> bool {
    match hex::decode(hash_hex) {
        Ok(bytes) => leading_zero_bits(&bytes) >= difficulty,
        Err(_) => false,
    }
}

/// Checks that `block` is a well-formed successor of `last_block`: index and
/// hash linkage, a hash matching the block's own fields, proof-of-work at the
/// stated difficulty, and a difficulty step of at most one.
pub fn validate_block(last_block: &Block, block: &Block) -> Result<(), ChainError> {
    if block.index != last_block.index + 1 {
        return Err(ChainError::ChainValidation(format!(
            "Block {} follows block {} but has index {}",
            last_block.index + 1,
            last_block.index,
            block.index
        )));
    }

    if block.last_hash != last_block.hash {
        return Err(ChainError::ChainValidation(format!(
            "Block {} last_hash {} does not match previous hash {}",
            block.index, block.last_hash, last_block.hash
        )));
    }

    let expected = block.compute_hash();
    if block.hash != expected {
        return Err(ChainError::ChainValidation(format!(
            "Block {} hash mismatch. Expected {}, but got {}.",
            block.index, expected, block.hash
        )));
    }

    if !hash_meets_difficulty(&block.hash, block.difficulty) {
        return Err(ChainError::ChainValidation(format!(
            "Block {} hash does not meet difficulty {}",
            block.index, block.difficulty
        )));
    }

    if block.difficulty.abs_diff(last_block.difficulty) > 1 {
        return Err(ChainError::ChainValidation(format!(
            "Block {} difficulty jumped from {} to {}",
            block.index, last_block.difficulty, block.difficulty
        )));
    }

    Ok(())
}

/// Full structural validation of a candidate chain. Pure: no state is read
/// beyond the arguments.
pub fn is_valid_chain(chain: &[Block]) -> Result<(), ChainError> {
    let genesis = chain
        .first()
        .ok_or_else(|| ChainError::ChainValidation("Chain is empty".to_string()))?;

    if *genesis != Block::genesis() {
        return Err(ChainError::ChainValidation(
            "The genesis block must be valid".to_string(),
        ));
    }

    for pair in chain.windows(2) {
        validate_block(&pair[0], &pair[1])?;
    }

    Ok(())
}
