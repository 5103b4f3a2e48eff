/// Economics module: fixed monetary and pacing parameters of the ledger

/// Balance of a wallet that has never appeared on the chain.
pub const STARTING_BALANCE: u64 = 1000;

/// Amount credited to a miner by each reward transaction.
pub const MINING_REWARD: u64 = 50;

/// Sentinel `input.address` marking a reward transaction.
pub const MINING_REWARD_ADDRESS: &str = "*--official-mining-reward--*";

/// Target time between blocks in milliseconds; drives the ±1 difficulty step.
pub const MINE_RATE_MS: u64 = 4_000;

/// Next block's difficulty given its predecessor's difficulty and how long
/// after the predecessor it is being mined.
pub fn adjust_difficulty(last_difficulty: u32, last_timestamp: u64, timestamp: u64) -> u32 {
    if timestamp.saturating_sub(last_timestamp) < MINE_RATE_MS {
        return last_difficulty + 1;
    }
    if last_difficulty > 1 {
        last_difficulty - 1
    } else {
        1
    }
}
