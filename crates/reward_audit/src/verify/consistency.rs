//! Cross-checks the reward ledger against the reward model and against the
//! providers' own balance deltas.
//!
//! Three views of the same payments are compared:
//!
//! - the per-round reward ledger (provider and delegate records),
//! - what [`crate::model`] says each winner and pool should have received,
//! - `after - before` of each provider's `total_reward` and each pool's `reward`.
//!
//! Numeric mismatches are collected into a [`VerificationReport`] so that one
//! run surfaces every discrepancy. Conditions that mean the model itself does
//! not apply (killed provider paid, double block reward, epoch change inside a
//! window, zero stake) abort with a [`VerifyError`].

use crate::ledger::{
    Amount, DelegateRewardRecord, EconomicParameters, ProviderSnapshot, ProviderTier, Round,
    RoundWindow, SnapshotSet,
};
use crate::model::{
    block_reward_for_round, epoch_of, fee_reward_for_round, proportional_delegate_split,
    selected_pool_cap, split_provider_reward, within_tolerance, ROUNDING_TOLERANCE,
};
use crate::store::{RoundDataStore, RoundHistory, StoreError};
use crate::verify::report::{Failure, Rule, VerificationReport};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CHECK_PROVIDER_BLOCK_REWARDS: &str = "provider_block_rewards";
pub const CHECK_ROUND_REWARD_FREQUENCY: &str = "round_reward_frequency";
pub const CHECK_DELEGATE_POOL_REWARDS: &str = "delegate_pool_rewards";
pub const CHECK_FEE_REWARDS: &str = "fee_rewards";

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no {which} snapshot for provider {provider_id}")]
    MissingSnapshot {
        provider_id: String,
        which: &'static str,
    },
    #[error("round {round}: killed provider {provider_id} received a reward of {amount}")]
    KilledProviderPaid {
        round: Round,
        provider_id: String,
        amount: Amount,
    },
    #[error("round {round}: {count} {tier} block reward records where at most {allowed} are allowed")]
    MultipleBlockRewards {
        round: Round,
        tier: ProviderTier,
        count: usize,
        allowed: usize,
    },
    #[error("round {round}: epoch changed from {from} to {to} inside the window")]
    EpochBoundaryCrossed { round: Round, from: u64, to: u64 },
    #[error("round {round}: delegate pools of {provider_id} have zero total stake")]
    ZeroTotalStake { round: Round, provider_id: String },
}

/// One provider's view for a check: both snapshots and the rounds between them.
struct ProviderContext<'s> {
    id: &'s str,
    before: &'s ProviderSnapshot,
    after: &'s ProviderSnapshot,
    window: RoundWindow,
    kill_round: Option<Round>,
}

impl<'s> ProviderContext<'s> {
    fn new(id: &'s str, before: &'s SnapshotSet, after: &'s SnapshotSet) -> Result<Self, VerifyError> {
        let missing = |which| VerifyError::MissingSnapshot {
            provider_id: id.to_string(),
            which,
        };
        let before = before.get(id).ok_or_else(|| missing("before"))?;
        let after = after.get(id).ok_or_else(|| missing("after"))?;
        // killed before the window: every round counts; killed during it: only
        // when the node tells us the round
        let kill_round = if before.is_killed {
            Some(before.killed_at_round.unwrap_or(0))
        } else if after.is_killed {
            after.killed_at_round
        } else {
            None
        };
        Ok(Self {
            id,
            before,
            after,
            window: RoundWindow::between(before, after),
            kill_round,
        })
    }

    fn ensure_not_paid_after_kill(&self, history: &RoundHistory) -> Result<(), VerifyError> {
        let Some(kill_round) = self.kill_round else {
            return Ok(());
        };
        let round = history.round();
        if round <= kill_round {
            return Ok(());
        }
        let paid = history
            .provider_records_any(self.id)
            .map(|r| r.amount)
            .chain(history.delegate_records_any(self.id).map(|r| r.amount))
            .reduce(|a, b| a.saturating_add(b));
        match paid {
            Some(amount) => Err(VerifyError::KilledProviderPaid {
                round,
                provider_id: self.id.to_string(),
                amount,
            }),
            None => Ok(()),
        }
    }

    /// Round a window-total failure is reported against.
    fn report_round(&self) -> Round {
        self.window.end
    }
}

/// Rejects a walk whose rounds do not all share one epoch.
#[derive(Default)]
struct EpochGuard {
    epoch: Option<u64>,
}

impl EpochGuard {
    fn observe(&mut self, round: Round, params: &EconomicParameters) -> Result<(), VerifyError> {
        let epoch = epoch_of(round, params);
        match self.epoch {
            Some(prev) if prev != epoch => Err(VerifyError::EpochBoundaryCrossed {
                round,
                from: prev,
                to: epoch,
            }),
            _ => {
                self.epoch = Some(epoch);
                Ok(())
            }
        }
    }
}

fn per_winner(tier_total: Amount, winners: usize) -> Amount {
    if winners == 0 {
        0
    } else {
        tier_total / winners as Amount
    }
}

fn flag(report: &mut VerificationReport, failure: Failure) {
    warn!(%failure, "reward discrepancy");
    report.push(failure);
}

/// Stateless checker over one loaded store and one parameter set.
pub struct ConsistencyVerifier<'a> {
    params: &'a EconomicParameters,
    store: &'a RoundDataStore,
}

impl<'a> ConsistencyVerifier<'a> {
    pub fn new(params: &'a EconomicParameters, store: &'a RoundDataStore) -> Self {
        Self { params, store }
    }

    /// Block reward (after delegate split) the provider itself should get in `round`.
    fn expected_block_share(
        &self,
        tier: ProviderTier,
        history: &RoundHistory,
        snapshot: &ProviderSnapshot,
    ) -> Amount {
        let shares = block_reward_for_round(history.round(), self.params);
        let total = per_winner(shares.for_tier(tier), history.winners(tier).len());
        split_provider_reward(total, snapshot.service_charge, snapshot.has_delegate_pools())
            .provider_share
    }

    fn expected_fee_share(
        &self,
        tier: ProviderTier,
        history: &RoundHistory,
        snapshot: &ProviderSnapshot,
    ) -> Amount {
        let shares = fee_reward_for_round(history.fees(), self.params);
        let total = per_winner(shares.for_tier(tier), history.winners(tier).len());
        split_provider_reward(total, snapshot.service_charge, snapshot.has_delegate_pools())
            .provider_share
    }

    /// Every winner of `tier` gets exactly one block-reward record of the model's
    /// amount, non-winners get none, and the provider's `total_reward` delta
    /// matches everything the ledger paid it over its window.
    pub fn check_provider_block_rewards(
        &self,
        tier: ProviderTier,
        provider_ids: &[String],
        before: &SnapshotSet,
        after: &SnapshotSet,
    ) -> Result<VerificationReport, VerifyError> {
        let mut report = VerificationReport::for_check(CHECK_PROVIDER_BLOCK_REWARDS);
        let block_type = tier.block_reward_type();
        for id in provider_ids {
            let ctx = ProviderContext::new(id, before, after)?;
            let mut epochs = EpochGuard::default();
            let mut observed_total: Amount = 0;
            let mut paid_records: usize = 0;
            for round in ctx.window.rounds() {
                epochs.observe(round, self.params)?;
                let history = self.store.round_history(round)?;
                ctx.ensure_not_paid_after_kill(history)?;

                for r in history
                    .provider_records_any(id)
                    .filter(|r| r.reward_type.tier() == Some(tier))
                {
                    observed_total = observed_total.saturating_add(r.amount);
                    paid_records += 1;
                }

                let records: Vec<_> = history.provider_records(id, block_type).collect();
                let actual: Amount = records.iter().map(|r| r.amount).sum();
                if !history.is_winner(tier, id) {
                    if !records.is_empty() {
                        flag(
                            &mut report,
                            Failure::new(round, Rule::UnexpectedBlockReward, 0, actual).provider(id),
                        );
                    }
                    continue;
                }
                let expected = self.expected_block_share(tier, history, ctx.before);
                match records.len() {
                    0 => flag(
                        &mut report,
                        Failure::new(round, Rule::MissingBlockReward, expected, 0).provider(id),
                    ),
                    1 => {
                        if !within_tolerance(expected, actual, ROUNDING_TOLERANCE) {
                            flag(
                                &mut report,
                                Failure::new(round, Rule::BlockRewardAmount, expected, actual)
                                    .provider(id),
                            );
                        }
                    }
                    count => {
                        return Err(VerifyError::MultipleBlockRewards {
                            round,
                            tier,
                            count,
                            allowed: 1,
                        })
                    }
                }
            }

            let delta = ctx.after.total_reward - ctx.before.total_reward;
            let tolerance = paid_records.max(1) as Amount * ROUNDING_TOLERANCE;
            if !within_tolerance(delta, observed_total, tolerance) {
                flag(
                    &mut report,
                    Failure::new(ctx.report_round(), Rule::ProviderRewardTotal, delta, observed_total)
                        .provider(id),
                );
            }
            info!(
                provider = %id,
                %tier,
                start = ctx.window.start,
                end = ctx.window.end,
                observed_total,
                delta,
                "provider block rewards checked"
            );
        }
        Ok(report)
    }

    /// Every round carries exactly one miner block reward, paid to the block's
    /// miner, and between one and `num_sharders_rewarded_per_round` sharder
    /// block rewards, one per sharder.
    pub fn check_round_reward_frequency(
        &self,
        window: RoundWindow,
    ) -> Result<VerificationReport, VerifyError> {
        let mut report = VerificationReport::for_check(CHECK_ROUND_REWARD_FREQUENCY);
        for round in window.rounds() {
            let history = self.store.round_history(round)?;
            let miner_id = history.block.miner_id.as_str();

            let miner_records: Vec<_> = history.block_reward_records(ProviderTier::Miner).collect();
            if miner_records.len() > 1 {
                return Err(VerifyError::MultipleBlockRewards {
                    round,
                    tier: ProviderTier::Miner,
                    count: miner_records.len(),
                    allowed: 1,
                });
            }
            match miner_records.first() {
                None if !miner_id.is_empty() => flag(
                    &mut report,
                    Failure::new(round, Rule::MissingBlockReward, 1, 0).provider(miner_id),
                ),
                Some(r) if r.provider_id != miner_id => flag(
                    &mut report,
                    Failure::new(round, Rule::BlockRewardToNonWinner, 0, r.amount)
                        .provider(&r.provider_id),
                ),
                _ => {}
            }

            let mut per_sharder: BTreeMap<&str, usize> = BTreeMap::new();
            for r in history.block_reward_records(ProviderTier::Sharder) {
                *per_sharder.entry(r.provider_id.as_str()).or_default() += 1;
            }
            if let Some((_, count)) = per_sharder.iter().find(|(_, c)| **c > 1) {
                return Err(VerifyError::MultipleBlockRewards {
                    round,
                    tier: ProviderTier::Sharder,
                    count: *count,
                    allowed: 1,
                });
            }
            let allowed = self.params.num_sharders_rewarded_per_round;
            if per_sharder.len() > allowed {
                return Err(VerifyError::MultipleBlockRewards {
                    round,
                    tier: ProviderTier::Sharder,
                    count: per_sharder.len(),
                    allowed,
                });
            }
            if per_sharder.is_empty() {
                flag(&mut report, Failure::new(round, Rule::MissingBlockReward, 1, 0));
            }
            debug!(
                round,
                miner = miner_id,
                primary_sharder = history.primary_sharder().unwrap_or(""),
                sharders = per_sharder.len(),
                "round frequency checked"
            );
        }
        Ok(report)
    }

    /// For every round a provider wins, exactly `min(pools, cap)` distinct
    /// delegate pools are paid (once each) in proportion to their stake; and
    /// each pool's `reward` delta matches its ledger records over the window.
    /// Both block and fee delegate records are checked.
    pub fn check_delegate_pool_rewards(
        &self,
        tier: ProviderTier,
        provider_ids: &[String],
        num_delegates_rewarded_cap: usize,
        before: &SnapshotSet,
        after: &SnapshotSet,
    ) -> Result<VerificationReport, VerifyError> {
        let mut report = VerificationReport::for_check(CHECK_DELEGATE_POOL_REWARDS);
        for id in provider_ids {
            let ctx = ProviderContext::new(id, before, after)?;
            let mut epochs = EpochGuard::default();
            let mut pool_totals: BTreeMap<String, (Amount, usize)> = BTreeMap::new();
            for round in ctx.window.rounds() {
                epochs.observe(round, self.params)?;
                let history = self.store.round_history(round)?;
                ctx.ensure_not_paid_after_kill(history)?;

                for r in history
                    .delegate_records_any(id)
                    .filter(|r| r.reward_type.tier() == Some(tier))
                {
                    let entry = pool_totals.entry(r.pool_id.clone()).or_default();
                    entry.0 = entry.0.saturating_add(r.amount);
                    entry.1 += 1;
                }

                let winner = history.is_winner(tier, id);
                let winners = history.winners(tier).len();
                let block_total = block_reward_for_round(round, self.params).for_tier(tier);
                let fee_total = fee_reward_for_round(history.fees(), self.params).for_tier(tier);
                for (reward_type, tier_total) in [
                    (tier.block_reward_type(), block_total),
                    (tier.fee_reward_type(), fee_total),
                ] {
                    let records: Vec<&DelegateRewardRecord> =
                        history.delegate_records(id, reward_type).collect();
                    let split = split_provider_reward(
                        per_winner(tier_total, winners),
                        ctx.before.service_charge,
                        ctx.before.has_delegate_pools(),
                    );
                    if !winner || split.delegate_pool_share == 0 {
                        for r in records.iter().filter(|r| r.amount != 0) {
                            flag(
                                &mut report,
                                Failure::new(round, Rule::UnexpectedDelegateReward, 0, r.amount)
                                    .provider(id)
                                    .pool(&r.pool_id),
                            );
                        }
                        continue;
                    }
                    self.check_paid_pools(
                        round,
                        &ctx,
                        num_delegates_rewarded_cap,
                        split.delegate_pool_share,
                        &records,
                        &mut report,
                    )?;
                }
            }

            let pool_ids: BTreeSet<&str> = ctx
                .before
                .delegate_pools
                .keys()
                .chain(ctx.after.delegate_pools.keys())
                .chain(pool_totals.keys())
                .map(String::as_str)
                .collect();
            for pool_id in pool_ids {
                let delta = ctx.after.pool_reward(pool_id) - ctx.before.pool_reward(pool_id);
                let (observed, records) = pool_totals.get(pool_id).copied().unwrap_or_default();
                let tolerance = records.max(1) as Amount * ROUNDING_TOLERANCE;
                if !within_tolerance(delta, observed, tolerance) {
                    flag(
                        &mut report,
                        Failure::new(ctx.report_round(), Rule::DelegateRewardTotal, delta, observed)
                            .provider(id)
                            .pool(pool_id),
                    );
                }
            }
            info!(provider = %id, %tier, pools = pool_totals.len(), "delegate pool rewards checked");
        }
        Ok(report)
    }

    /// Paid-pool count, duplicates and proportional amounts for one reward type
    /// of one winning round. The randomly selected subset is taken as observed;
    /// proportions are computed over the paid pools' stake only.
    fn check_paid_pools(
        &self,
        round: Round,
        ctx: &ProviderContext<'_>,
        cap: usize,
        delegate_pool_share: Amount,
        records: &[&DelegateRewardRecord],
        report: &mut VerificationReport,
    ) -> Result<(), VerifyError> {
        let id = ctx.id;
        let mut paid: BTreeMap<&str, (Amount, usize)> = BTreeMap::new();
        for r in records {
            let entry = paid.entry(r.pool_id.as_str()).or_default();
            entry.0 = entry.0.saturating_add(r.amount);
            entry.1 += 1;
        }
        for (pool_id, (_, count)) in &paid {
            if *count > 1 {
                flag(
                    report,
                    Failure::new(round, Rule::DuplicateDelegateReward, 1, *count as Amount)
                        .provider(id)
                        .pool(pool_id),
                );
            }
        }

        let expected_count = selected_pool_cap(ctx.before.delegate_pools.len(), cap);
        if paid.len() != expected_count {
            flag(
                report,
                Failure::new(
                    round,
                    Rule::DelegateCount,
                    expected_count as Amount,
                    paid.len() as Amount,
                )
                .provider(id),
            );
        }

        let mut stakes: BTreeMap<String, Amount> = BTreeMap::new();
        let mut unknown = false;
        for (pool_id, (amount, _)) in &paid {
            match ctx.before.delegate_pools.get(*pool_id) {
                Some(pool) => {
                    stakes.insert(pool_id.to_string(), pool.balance);
                }
                None => {
                    unknown = true;
                    flag(
                        report,
                        Failure::new(round, Rule::UnknownDelegatePool, 0, *amount)
                            .provider(id)
                            .pool(pool_id),
                    );
                }
            }
        }
        if unknown || stakes.is_empty() {
            return Ok(());
        }

        let expected = proportional_delegate_split(delegate_pool_share, &stakes).map_err(|_| {
            VerifyError::ZeroTotalStake {
                round,
                provider_id: id.to_string(),
            }
        })?;
        for (pool_id, expected_amount) in &expected {
            let actual = paid.get(pool_id.as_str()).map_or(0, |(a, _)| *a);
            if !within_tolerance(*expected_amount, actual, ROUNDING_TOLERANCE) {
                flag(
                    report,
                    Failure::new(round, Rule::DelegateRewardAmount, *expected_amount, actual)
                        .provider(id)
                        .pool(pool_id),
                );
            }
        }
        Ok(())
    }

    /// Fee-reward records match the model for winning rounds. A round whose
    /// provider fee share is zero (no fees) legitimately has no record.
    pub fn check_fee_rewards(
        &self,
        tier: ProviderTier,
        provider_ids: &[String],
        before: &SnapshotSet,
        after: &SnapshotSet,
    ) -> Result<VerificationReport, VerifyError> {
        let mut report = VerificationReport::for_check(CHECK_FEE_REWARDS);
        let fee_type = tier.fee_reward_type();
        for id in provider_ids {
            let ctx = ProviderContext::new(id, before, after)?;
            let mut epochs = EpochGuard::default();
            for round in ctx.window.rounds() {
                epochs.observe(round, self.params)?;
                let history = self.store.round_history(round)?;
                ctx.ensure_not_paid_after_kill(history)?;

                let records: Vec<_> = history.provider_records(id, fee_type).collect();
                let actual: Amount = records.iter().map(|r| r.amount).sum();
                if !history.is_winner(tier, id) {
                    if !records.is_empty() {
                        flag(
                            &mut report,
                            Failure::new(round, Rule::UnexpectedFeeReward, 0, actual).provider(id),
                        );
                    }
                    continue;
                }
                let expected = self.expected_fee_share(tier, history, ctx.before);
                if expected == 0 {
                    if actual != 0 {
                        flag(
                            &mut report,
                            Failure::new(round, Rule::UnexpectedFeeReward, 0, actual).provider(id),
                        );
                    }
                    continue;
                }
                match records.len() {
                    0 => flag(
                        &mut report,
                        Failure::new(round, Rule::MissingFeeReward, expected, 0).provider(id),
                    ),
                    1 => {
                        if !within_tolerance(expected, actual, ROUNDING_TOLERANCE) {
                            flag(
                                &mut report,
                                Failure::new(round, Rule::FeeRewardAmount, expected, actual)
                                    .provider(id),
                            );
                        }
                    }
                    count => flag(
                        &mut report,
                        Failure::new(round, Rule::DuplicateFeeReward, 1, count as Amount)
                            .provider(id),
                    ),
                }
            }
            debug!(provider = %id, %tier, "fee rewards checked");
        }
        Ok(report)
    }

    /// Block, fee and delegate checks for every provider of one tier, with the
    /// tier's configured delegate cap.
    pub fn verify_tier(
        &self,
        tier: ProviderTier,
        provider_ids: &[String],
        before: &SnapshotSet,
        after: &SnapshotSet,
    ) -> Result<VerificationReport, VerifyError> {
        let mut report = self.check_provider_block_rewards(tier, provider_ids, before, after)?;
        report.merge(self.check_fee_rewards(tier, provider_ids, before, after)?);
        report.merge(self.check_delegate_pool_rewards(
            tier,
            provider_ids,
            self.params.delegates_rewarded(tier),
            before,
            after,
        )?);
        info!(
            %tier,
            providers = provider_ids.len(),
            failures = report.failures.len(),
            "tier verified"
        );
        Ok(report)
    }
}
