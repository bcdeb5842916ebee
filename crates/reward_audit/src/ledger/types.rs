//! Blocks, reward ledger records, and provider snapshots as served by a sharder.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Round number.
pub type Round = u64;

/// Amount in the smallest currency unit. Signed so that balance deltas can go negative.
pub type Amount = i64;

/// Smallest units per whole token.
pub const UNITS_PER_TOKEN: i64 = 10_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTier {
    Miner,
    Sharder,
}

impl ProviderTier {
    pub fn block_reward_type(self) -> RewardType {
        match self {
            ProviderTier::Miner => RewardType::BlockRewardMiner,
            ProviderTier::Sharder => RewardType::BlockRewardSharder,
        }
    }

    pub fn fee_reward_type(self) -> RewardType {
        match self {
            ProviderTier::Miner => RewardType::FeeRewardMiner,
            ProviderTier::Sharder => RewardType::FeeRewardSharder,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderTier::Miner => "miner",
            ProviderTier::Sharder => "sharder",
        }
    }
}

impl std::fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reward ledger entry kind. Anything the ledger emits that is not a miner or
/// sharder reward (blobber, validator, ...) decodes as `Other`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardType {
    BlockRewardMiner,
    FeeRewardMiner,
    BlockRewardSharder,
    FeeRewardSharder,
    #[serde(other)]
    Other,
}

impl RewardType {
    pub fn tier(self) -> Option<ProviderTier> {
        match self {
            RewardType::BlockRewardMiner | RewardType::FeeRewardMiner => Some(ProviderTier::Miner),
            RewardType::BlockRewardSharder | RewardType::FeeRewardSharder => {
                Some(ProviderTier::Sharder)
            }
            RewardType::Other => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub fee: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub round: Round,
    pub miner_id: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Fee pool of the round: sum of transaction fees.
    pub fn total_fees(&self) -> Amount {
        self.transactions
            .iter()
            .fold(0i64, |acc, tx| acc.saturating_add(tx.fee))
    }
}

/// Payment to a provider's own service-charge share.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRewardRecord {
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,
    pub reward_type: RewardType,
    pub amount: Amount,
}

/// Payment to one delegate pool staked on a provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateRewardRecord {
    pub provider_id: String,
    pub pool_id: String,
    pub reward_type: RewardType,
    pub amount: Amount,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatePool {
    pub balance: Amount,
    #[serde(default)]
    pub reward: Amount,
}

/// A provider's on-chain record at one instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub id: String,
    pub provider_type: ProviderTier,
    #[serde(default)]
    pub is_killed: bool,
    /// Round the kill took effect, when the node reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub killed_at_round: Option<Round>,
    pub service_charge: f64,
    #[serde(default)]
    pub total_stake: Amount,
    #[serde(default)]
    pub total_reward: Amount,
    #[serde(default)]
    pub round_service_charge_last_updated: Round,
    #[serde(default)]
    pub delegate_pools: BTreeMap<String, DelegatePool>,
}

impl ProviderSnapshot {
    pub fn has_delegate_pools(&self) -> bool {
        !self.delegate_pools.is_empty()
    }

    pub fn pool_reward(&self, pool_id: &str) -> Amount {
        self.delegate_pools.get(pool_id).map_or(0, |p| p.reward)
    }
}

/// Snapshots keyed by provider id.
pub type SnapshotSet = BTreeMap<String, ProviderSnapshot>;

/// Closed interval of rounds. Empty when `end < start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundWindow {
    pub start: Round,
    pub end: Round,
}

impl RoundWindow {
    pub fn new(start: Round, end: Round) -> Self {
        Self { start, end }
    }

    /// Rounds a provider was paid for between two snapshots:
    /// `(before.round_service_charge_last_updated, after.round_service_charge_last_updated]`.
    pub fn between(before: &ProviderSnapshot, after: &ProviderSnapshot) -> Self {
        Self {
            start: before.round_service_charge_last_updated.saturating_add(1),
            end: after.round_service_charge_last_updated,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn contains(&self, round: Round) -> bool {
        round >= self.start && round <= self.end
    }

    /// Ascending rounds of the window (yields nothing when empty).
    pub fn rounds(&self) -> std::ops::RangeInclusive<Round> {
        self.start..=self.end
    }

    /// Smallest window covering both.
    pub fn union(&self, other: &RoundWindow) -> RoundWindow {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => *other,
            (_, true) => *self,
            _ => RoundWindow {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(last: Round) -> ProviderSnapshot {
        ProviderSnapshot {
            id: "m1".into(),
            provider_type: ProviderTier::Miner,
            is_killed: false,
            killed_at_round: None,
            service_charge: 0.1,
            total_stake: 0,
            total_reward: 0,
            round_service_charge_last_updated: last,
            delegate_pools: BTreeMap::new(),
        }
    }

    #[test]
    fn reward_type_decodes_unknown_as_other() {
        let t: RewardType = serde_json::from_str(r#""block_reward_blobber""#).unwrap();
        assert_eq!(t, RewardType::Other);
        let t: RewardType = serde_json::from_str(r#""fee_reward_sharder""#).unwrap();
        assert_eq!(t, RewardType::FeeRewardSharder);
        assert_eq!(t.tier(), Some(ProviderTier::Sharder));
    }

    #[test]
    fn block_fees_sum() {
        let block: Block = serde_json::from_str(
            r#"{"round":5,"miner_id":"m1","transactions":[{"hash":"a","fee":10},{"hash":"b","fee":32}]}"#,
        )
        .unwrap();
        assert_eq!(block.total_fees(), 42);
        let empty: Block = serde_json::from_str(r#"{"round":6,"miner_id":"m1"}"#).unwrap();
        assert_eq!(empty.total_fees(), 0);
    }

    #[test]
    fn window_between_snapshots_is_half_open_on_the_left() {
        let w = RoundWindow::between(&snapshot(10), &snapshot(14));
        assert_eq!(w, RoundWindow::new(11, 14));
        assert_eq!(w.len(), 4);
        assert_eq!(w.rounds().collect::<Vec<_>>(), vec![11, 12, 13, 14]);
    }

    #[test]
    fn unchanged_snapshot_gives_empty_window() {
        let w = RoundWindow::between(&snapshot(10), &snapshot(10));
        assert!(w.is_empty());
        assert_eq!(w.len(), 0);
        assert_eq!(w.rounds().count(), 0);
        let u = w.union(&RoundWindow::new(3, 4));
        assert_eq!(u, RoundWindow::new(3, 4));
    }
}
