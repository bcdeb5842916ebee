//! Expected block/fee reward per round and how it is split between a provider
//! and its delegate pools.

use crate::ledger::{Amount, EconomicParameters, ProviderTier, Round};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Rounding slack between a floor-truncated expectation and the ledger's own split.
pub const ROUNDING_TOLERANCE: Amount = 1;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModelError {
    #[error("delegate pools have zero total stake")]
    ZeroTotalStake,
}

/// Miner-tier and sharder-tier portions of a round's reward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierShares {
    pub miner: Amount,
    pub sharder: Amount,
}

impl TierShares {
    pub fn for_tier(&self, tier: ProviderTier) -> Amount {
        match tier {
            ProviderTier::Miner => self.miner,
            ProviderTier::Sharder => self.sharder,
        }
    }
}

/// Provider service-charge share and the remainder owed to its delegate pools.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSplit {
    pub provider_share: Amount,
    pub delegate_pool_share: Amount,
}

/// Epoch containing `round`. A zero epoch length puts every round in epoch 0.
pub fn epoch_of(round: Round, params: &EconomicParameters) -> u64 {
    round.checked_div(params.epoch_length).unwrap_or(0)
}

/// Block reward for the epoch containing `round`, split by share ratio.
pub fn block_reward_for_round(round: Round, params: &EconomicParameters) -> TierShares {
    let epoch = epoch_of(round, params);
    let decline = (1.0 - params.reward_decline_rate).powf(epoch as f64);
    let total = params.base_block_reward as f64 * decline;
    let miner = (total * params.share_ratio).floor() as Amount;
    let sharder = total.floor() as Amount - miner;
    TierShares { miner, sharder }
}

/// Fee pool of a round split by share ratio.
pub fn fee_reward_for_round(fees: Amount, params: &EconomicParameters) -> TierShares {
    if fees <= 0 {
        return TierShares::default();
    }
    let miner = (fees as f64 * params.share_ratio).floor() as Amount;
    TierShares {
        miner,
        sharder: fees - miner,
    }
}

/// A provider without delegate pools keeps the whole amount.
pub fn split_provider_reward(
    total_amount: Amount,
    service_charge: f64,
    has_delegate_pools: bool,
) -> ProviderSplit {
    if !has_delegate_pools {
        return ProviderSplit {
            provider_share: total_amount,
            delegate_pool_share: 0,
        };
    }
    let provider_share = (total_amount as f64 * service_charge).floor() as Amount;
    ProviderSplit {
        provider_share,
        delegate_pool_share: total_amount - provider_share,
    }
}

/// Split `delegate_pool_share` across `pools` (pool id → staked balance) in
/// proportion to stake. Each pool gets `floor(share * stake / total)`; the
/// flooring remainder is not redistributed.
pub fn proportional_delegate_split(
    delegate_pool_share: Amount,
    pools: &BTreeMap<String, Amount>,
) -> Result<BTreeMap<String, Amount>, ModelError> {
    let total: i128 = pools.values().map(|b| i128::from(*b)).sum();
    if total <= 0 {
        return Err(ModelError::ZeroTotalStake);
    }
    let share = i128::from(delegate_pool_share);
    Ok(pools
        .iter()
        .map(|(id, balance)| {
            let amount = (share * i128::from(*balance)).div_euclid(total);
            (id.clone(), amount as Amount)
        })
        .collect())
}

/// Number of pools (or sharders) actually paid in a round.
pub fn selected_pool_cap(total_pools: usize, configured_cap: usize) -> usize {
    total_pools.min(configured_cap)
}

pub fn within_tolerance(expected: Amount, actual: Amount, tolerance: Amount) -> bool {
    expected.abs_diff(actual) <= tolerance.unsigned_abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> EconomicParameters {
        EconomicParameters {
            epoch_length: 50_000_000,
            reward_decline_rate: 0.1,
            base_block_reward: 7_100_000_000,
            share_ratio: 0.10,
            num_miner_delegates_rewarded: 10,
            num_sharder_delegates_rewarded: 5,
            num_sharders_rewarded_per_round: 1,
        }
    }

    #[test]
    fn block_reward_epoch_zero() {
        let p = params();
        assert_eq!(epoch_of(1, &p), 0);
        let shares = block_reward_for_round(1, &p);
        assert_eq!(shares.miner, 710_000_000);
        assert_eq!(shares.sharder, 6_390_000_000);
        assert_eq!(shares.for_tier(ProviderTier::Sharder), 6_390_000_000);
    }

    #[test]
    fn block_reward_declines_per_epoch() {
        let p = params();
        let e0 = block_reward_for_round(p.epoch_length - 1, &p);
        let e1 = block_reward_for_round(p.epoch_length, &p);
        assert_eq!(e1.miner + e1.sharder, 6_390_000_000);
        assert!(e1.miner < e0.miner);
    }

    #[test]
    fn block_reward_non_increasing_over_rounds() {
        let p = EconomicParameters {
            epoch_length: 7,
            ..params()
        };
        let mut prev = block_reward_for_round(0, &p);
        for round in 1..200 {
            let cur = block_reward_for_round(round, &p);
            assert!(cur.miner + cur.sharder <= prev.miner + prev.sharder);
            assert!(cur.miner <= prev.miner);
            prev = cur;
        }
    }

    #[test]
    fn full_decay_pays_nothing() {
        let p = EconomicParameters {
            reward_decline_rate: 1.0,
            epoch_length: 10,
            ..params()
        };
        assert_eq!(block_reward_for_round(25, &p), TierShares::default());
        // epoch 0 is untouched: 0^0 == 1
        assert_eq!(block_reward_for_round(3, &p).miner, 710_000_000);
    }

    #[test]
    fn zero_epoch_length_does_not_divide_by_zero() {
        let p = EconomicParameters {
            epoch_length: 0,
            ..params()
        };
        assert_eq!(epoch_of(1_000, &p), 0);
        assert_eq!(block_reward_for_round(1_000, &p).miner, 710_000_000);
    }

    #[test]
    fn fee_split_by_share_ratio() {
        let p = params();
        assert_eq!(
            fee_reward_for_round(1_000, &p),
            TierShares {
                miner: 100,
                sharder: 900
            }
        );
        assert_eq!(fee_reward_for_round(0, &p), TierShares::default());
    }

    #[test]
    fn provider_without_pools_keeps_everything() {
        assert_eq!(
            split_provider_reward(1_000, 0.1, false),
            ProviderSplit {
                provider_share: 1_000,
                delegate_pool_share: 0
            }
        );
        assert_eq!(
            split_provider_reward(1_000, 0.1, true),
            ProviderSplit {
                provider_share: 100,
                delegate_pool_share: 900
            }
        );
    }

    fn pools(entries: &[(&str, Amount)]) -> BTreeMap<String, Amount> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn proportional_split_exact() {
        let out = proportional_delegate_split(900, &pools(&[("A", 300), ("B", 600)])).unwrap();
        assert_eq!(out, pools(&[("A", 300), ("B", 600)]));
        let out = proportional_delegate_split(900, &pools(&[("A", 300), ("B", 700)])).unwrap();
        assert_eq!(out, pools(&[("A", 270), ("B", 630)]));
        assert_eq!(out.values().sum::<Amount>(), 900);
    }

    #[test]
    fn proportional_split_loses_remainder() {
        let out = proportional_delegate_split(10, &pools(&[("A", 1), ("B", 2)])).unwrap();
        assert_eq!(out, pools(&[("A", 3), ("B", 6)]));
        let sum: Amount = out.values().sum();
        assert_eq!(sum, 9);
        assert!(within_tolerance(10, sum, ROUNDING_TOLERANCE));
    }

    #[test]
    fn proportional_split_never_exceeds_share() {
        let stakes = pools(&[("a", 17), ("b", 3), ("c", 1_000_003), ("d", 99)]);
        let total: Amount = stakes.values().sum();
        for share in [0, 1, 7, 999, 123_456_789] {
            let out = proportional_delegate_split(share, &stakes).unwrap();
            assert!(out.values().sum::<Amount>() <= share);
            for (id, amount) in &out {
                assert!(*amount * total <= share * stakes[id]);
            }
        }
    }

    #[test]
    fn proportional_split_zero_stake() {
        assert_eq!(
            proportional_delegate_split(10, &pools(&[("A", 0)])),
            Err(ModelError::ZeroTotalStake)
        );
        assert_eq!(
            proportional_delegate_split(10, &BTreeMap::new()),
            Err(ModelError::ZeroTotalStake)
        );
    }

    #[test]
    fn pool_cap() {
        assert_eq!(selected_pool_cap(3, 10), 3);
        assert_eq!(selected_pool_cap(30, 10), 10);
        assert_eq!(selected_pool_cap(0, 10), 0);
    }
}
