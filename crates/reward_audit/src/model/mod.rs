//! Reward model: epoch decay, tier split, provider/delegate split.

mod reward;

pub use reward::{
    block_reward_for_round, epoch_of, fee_reward_for_round, proportional_delegate_split,
    selected_pool_cap, split_provider_reward, within_tolerance, ModelError, ProviderSplit,
    TierShares, ROUNDING_TOLERANCE,
};
