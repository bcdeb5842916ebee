//! Collected, non-fatal discrepancies from a verification run.

use crate::ledger::{Amount, Round};
use serde::{Deserialize, Serialize};

/// Which consistency rule a failure breaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// Winner has no block-reward record.
    MissingBlockReward,
    /// Non-winner has a block-reward record.
    UnexpectedBlockReward,
    /// Block reward went to someone other than the round's miner.
    BlockRewardToNonWinner,
    BlockRewardAmount,
    MissingFeeReward,
    UnexpectedFeeReward,
    /// More than one fee record of one type for a provider in a round.
    DuplicateFeeReward,
    FeeRewardAmount,
    /// Paid delegate pools differ from `min(pools, cap)`.
    DelegateCount,
    DuplicateDelegateReward,
    UnexpectedDelegateReward,
    UnknownDelegatePool,
    DelegateRewardAmount,
    /// Provider `total_reward` delta differs from the summed ledger records.
    ProviderRewardTotal,
    /// Pool `reward` delta differs from the summed ledger records.
    DelegateRewardTotal,
}

impl Rule {
    pub fn as_str(self) -> &'static str {
        match self {
            Rule::MissingBlockReward => "missing_block_reward",
            Rule::UnexpectedBlockReward => "unexpected_block_reward",
            Rule::BlockRewardToNonWinner => "block_reward_to_non_winner",
            Rule::BlockRewardAmount => "block_reward_amount",
            Rule::MissingFeeReward => "missing_fee_reward",
            Rule::UnexpectedFeeReward => "unexpected_fee_reward",
            Rule::DuplicateFeeReward => "duplicate_fee_reward",
            Rule::FeeRewardAmount => "fee_reward_amount",
            Rule::DelegateCount => "delegate_count",
            Rule::DuplicateDelegateReward => "duplicate_delegate_reward",
            Rule::UnexpectedDelegateReward => "unexpected_delegate_reward",
            Rule::UnknownDelegatePool => "unknown_delegate_pool",
            Rule::DelegateRewardAmount => "delegate_reward_amount",
            Rule::ProviderRewardTotal => "provider_reward_total",
            Rule::DelegateRewardTotal => "delegate_reward_total",
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Round of the discrepancy; window totals carry the window's last round.
    pub round: Round,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,
    pub expected: Amount,
    pub actual: Amount,
    pub rule: Rule,
}

impl Failure {
    pub fn new(round: Round, rule: Rule, expected: Amount, actual: Amount) -> Self {
        Self {
            round,
            provider_id: None,
            pool_id: None,
            expected,
            actual,
            rule,
        }
    }

    pub fn provider(mut self, provider_id: &str) -> Self {
        self.provider_id = Some(provider_id.to_string());
        self
    }

    pub fn pool(mut self, pool_id: &str) -> Self {
        self.pool_id = Some(pool_id.to_string());
        self
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "round {} {}", self.round, self.rule)?;
        if let Some(p) = &self.provider_id {
            write!(f, " provider={}", p)?;
        }
        if let Some(p) = &self.pool_id {
            write!(f, " pool={}", p)?;
        }
        write!(f, " expected={} actual={}", self.expected, self.actual)
    }
}

/// Outcome of one or more checks: pass, or every discrepancy in the order found.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub checks: Vec<String>,
    pub failures: Vec<Failure>,
}

impl VerificationReport {
    pub fn for_check(name: &str) -> Self {
        Self {
            checks: vec![name.to_string()],
            failures: Vec::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn push(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    pub fn merge(&mut self, other: VerificationReport) {
        self.checks.extend(other.checks);
        self.failures.extend(other.failures);
    }

    pub fn count_by_rule(&self, rule: Rule) -> usize {
        self.failures.iter().filter(|f| f.rule == rule).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_order() {
        let mut a = VerificationReport::for_check("a");
        a.push(Failure::new(3, Rule::BlockRewardAmount, 10, 12).provider("m1"));
        let mut b = VerificationReport::for_check("b");
        b.push(Failure::new(1, Rule::DelegateCount, 2, 1).provider("m1").pool("p"));
        a.merge(b);
        assert!(!a.passed());
        assert_eq!(a.checks, vec!["a", "b"]);
        assert_eq!(a.failures[1].rule, Rule::DelegateCount);
        assert_eq!(a.count_by_rule(Rule::BlockRewardAmount), 1);
    }

    #[test]
    fn failure_display_and_json() {
        let f = Failure::new(7, Rule::DelegateRewardAmount, 270, 268)
            .provider("m1")
            .pool("A");
        assert_eq!(
            f.to_string(),
            "round 7 delegate_reward_amount provider=m1 pool=A expected=270 actual=268"
        );
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["rule"], "delegate_reward_amount");
        let no_pool = serde_json::to_value(Failure::new(1, Rule::MissingBlockReward, 1, 0)).unwrap();
        assert!(no_pool.get("pool_id").is_none());
    }
}
