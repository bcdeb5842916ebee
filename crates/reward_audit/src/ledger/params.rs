//! Global economic parameters of the miner smart contract.
//!
//! The node serves them as a flat map of string settings (`{"fields": {...}}`);
//! [`EconomicParameters::from_settings`] picks out the keys the reward model
//! depends on and normalizes them. Values are fixed for one verification run.

use crate::chain::normalize::{
    parse_count, parse_fraction, parse_limit, parse_token_amount, NormalizeError,
};
use crate::ledger::{Amount, ProviderTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const KEY_EPOCH: &str = "epoch";
pub const KEY_REWARD_DECLINE_RATE: &str = "reward_decline_rate";
pub const KEY_BLOCK_REWARD: &str = "block_reward.block_reward";
pub const KEY_SHARE_RATIO: &str = "block_reward.share_ratio";
pub const KEY_NUM_MINER_DELEGATES_REWARDED: &str = "num_miner_delegates_rewarded";
pub const KEY_NUM_SHARDER_DELEGATES_REWARDED: &str = "num_sharder_delegates_rewarded";
pub const KEY_NUM_SHARDERS_REWARDED: &str = "num_sharders_rewarded";

#[derive(Error, Debug, PartialEq)]
pub enum ParamsError {
    #[error("missing setting: {0}")]
    Missing(String),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("invalid parameters: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EconomicParameters {
    /// Rounds per epoch.
    pub epoch_length: u64,
    /// Fraction the block reward shrinks by each epoch.
    pub reward_decline_rate: f64,
    /// Block reward at epoch 0, in smallest units.
    pub base_block_reward: Amount,
    /// Fraction of block reward and fees going to the miner tier.
    pub share_ratio: f64,
    pub num_miner_delegates_rewarded: usize,
    pub num_sharder_delegates_rewarded: usize,
    pub num_sharders_rewarded_per_round: usize,
}

impl EconomicParameters {
    /// Build from the node's settings map. Unknown keys are ignored.
    pub fn from_settings(fields: &BTreeMap<String, String>) -> Result<Self, ParamsError> {
        let get = |key: &str| {
            fields
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| ParamsError::Missing(key.to_string()))
        };
        let params = Self {
            epoch_length: parse_count(KEY_EPOCH, get(KEY_EPOCH)?)?,
            reward_decline_rate: parse_fraction(
                KEY_REWARD_DECLINE_RATE,
                get(KEY_REWARD_DECLINE_RATE)?,
            )?,
            base_block_reward: parse_token_amount(KEY_BLOCK_REWARD, get(KEY_BLOCK_REWARD)?)?,
            share_ratio: parse_fraction(KEY_SHARE_RATIO, get(KEY_SHARE_RATIO)?)?,
            num_miner_delegates_rewarded: parse_limit(
                KEY_NUM_MINER_DELEGATES_REWARDED,
                get(KEY_NUM_MINER_DELEGATES_REWARDED)?,
            )?,
            num_sharder_delegates_rewarded: parse_limit(
                KEY_NUM_SHARDER_DELEGATES_REWARDED,
                get(KEY_NUM_SHARDER_DELEGATES_REWARDED)?,
            )?,
            num_sharders_rewarded_per_round: parse_limit(
                KEY_NUM_SHARDERS_REWARDED,
                get(KEY_NUM_SHARDERS_REWARDED)?,
            )?,
        };
        params.validate()?;
        Ok(params)
    }

    /// Reject parameter sets the reward model cannot work with.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.epoch_length == 0 {
            return Err(ParamsError::Invalid("epoch length must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.reward_decline_rate) {
            return Err(ParamsError::Invalid(format!(
                "reward decline rate {} outside [0, 1]",
                self.reward_decline_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.share_ratio) {
            return Err(ParamsError::Invalid(format!(
                "share ratio {} outside [0, 1]",
                self.share_ratio
            )));
        }
        if self.base_block_reward < 0 {
            return Err(ParamsError::Invalid("negative block reward".into()));
        }
        if self.num_sharders_rewarded_per_round == 0 {
            return Err(ParamsError::Invalid(
                "at least one sharder must be rewarded per round".into(),
            ));
        }
        Ok(())
    }

    /// Delegate pools paid per round for a provider of `tier`.
    pub fn delegates_rewarded(&self, tier: ProviderTier) -> usize {
        match tier {
            ProviderTier::Miner => self.num_miner_delegates_rewarded,
            ProviderTier::Sharder => self.num_sharder_delegates_rewarded,
        }
    }
}
