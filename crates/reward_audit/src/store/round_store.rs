//! Windowed cache of per-round block and reward-ledger data.

use crate::chain::{FetchError, LedgerSource};
use crate::ledger::{
    Amount, Block, DelegateRewardRecord, ProviderRewardRecord, ProviderTier, RewardType, Round,
    RoundWindow,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF_MS: u64 = 500;
const FETCH_TIMEOUT_MS: u64 = 30_000;
const FETCH_CONCURRENCY: usize = 8;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid round range: end {end} < start {start}")]
    InvalidRange { start: Round, end: Round },
    #[error("round {round}: data unavailable: {source}")]
    DataUnavailable {
        round: Round,
        #[source]
        source: FetchError,
    },
    #[error("round {round} not in loaded range {start}..={end}")]
    RoundNotInRange { round: Round, start: Round, end: Round },
    #[error("no history supplied for round {0}")]
    MissingRound(Round),
    #[error("fetch task: {0}")]
    Task(String),
}

/// Retry, timeout and parallelism applied uniformly to every round fetch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_ms: u64,
    pub concurrency: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            backoff_ms: RETRY_BACKOFF_MS,
            timeout_ms: FETCH_TIMEOUT_MS,
            concurrency: FETCH_CONCURRENCY,
        }
    }
}

/// Everything the ledger recorded for one round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundHistory {
    pub block: Block,
    pub provider_rewards: Vec<ProviderRewardRecord>,
    pub delegate_rewards: Vec<DelegateRewardRecord>,
}

impl RoundHistory {
    /// Records are stored sorted by (type, provider, pool) so that every
    /// downstream walk is independent of the node's response order.
    pub fn new(
        block: Block,
        mut provider_rewards: Vec<ProviderRewardRecord>,
        mut delegate_rewards: Vec<DelegateRewardRecord>,
    ) -> Self {
        provider_rewards.sort_by(|a, b| {
            (a.reward_type, &a.provider_id, &a.pool_id, a.amount).cmp(&(
                b.reward_type,
                &b.provider_id,
                &b.pool_id,
                b.amount,
            ))
        });
        delegate_rewards.sort_by(|a, b| {
            (a.reward_type, &a.provider_id, &a.pool_id, a.amount).cmp(&(
                b.reward_type,
                &b.provider_id,
                &b.pool_id,
                b.amount,
            ))
        });
        Self {
            block,
            provider_rewards,
            delegate_rewards,
        }
    }

    pub fn round(&self) -> Round {
        self.block.round
    }

    pub fn fees(&self) -> Amount {
        self.block.total_fees()
    }

    pub fn provider_records<'a>(
        &'a self,
        provider_id: &'a str,
        reward_type: RewardType,
    ) -> impl Iterator<Item = &'a ProviderRewardRecord> + 'a {
        self.provider_rewards
            .iter()
            .filter(move |r| r.reward_type == reward_type && r.provider_id == provider_id)
    }

    /// Every miner/sharder reward record naming `provider_id`, any type.
    pub fn provider_records_any<'a>(
        &'a self,
        provider_id: &'a str,
    ) -> impl Iterator<Item = &'a ProviderRewardRecord> + 'a {
        self.provider_rewards
            .iter()
            .filter(move |r| r.reward_type.tier().is_some() && r.provider_id == provider_id)
    }

    pub fn delegate_records<'a>(
        &'a self,
        provider_id: &'a str,
        reward_type: RewardType,
    ) -> impl Iterator<Item = &'a DelegateRewardRecord> + 'a {
        self.delegate_rewards
            .iter()
            .filter(move |r| r.reward_type == reward_type && r.provider_id == provider_id)
    }

    pub fn delegate_records_any<'a>(
        &'a self,
        provider_id: &'a str,
    ) -> impl Iterator<Item = &'a DelegateRewardRecord> + 'a {
        self.delegate_rewards
            .iter()
            .filter(move |r| r.reward_type.tier().is_some() && r.provider_id == provider_id)
    }

    /// Block-reward records of one tier, system-wide.
    pub fn block_reward_records(
        &self,
        tier: ProviderTier,
    ) -> impl Iterator<Item = &ProviderRewardRecord> {
        let reward_type = tier.block_reward_type();
        self.provider_rewards
            .iter()
            .filter(move |r| r.reward_type == reward_type)
    }

    /// Sharders paid a block reward this round, in id order.
    pub fn winning_sharders(&self) -> BTreeSet<&str> {
        self.block_reward_records(ProviderTier::Sharder)
            .map(|r| r.provider_id.as_str())
            .collect()
    }

    /// The lexicographically smallest winning sharder.
    pub fn primary_sharder(&self) -> Option<&str> {
        self.winning_sharders().into_iter().next()
    }

    /// Winners of `tier` for this round: the block's miner, or the paid sharders.
    pub fn winners(&self, tier: ProviderTier) -> BTreeSet<&str> {
        match tier {
            ProviderTier::Miner if self.block.miner_id.is_empty() => BTreeSet::new(),
            ProviderTier::Miner => BTreeSet::from([self.block.miner_id.as_str()]),
            ProviderTier::Sharder => self.winning_sharders(),
        }
    }

    pub fn is_winner(&self, tier: ProviderTier, provider_id: &str) -> bool {
        self.winners(tier).contains(provider_id)
    }
}

/// Cached view over `[start, end]`. Unloaded until [`RoundDataStore::load`]
/// succeeds; read-only afterwards.
#[derive(Debug)]
pub struct RoundDataStore {
    window: RoundWindow,
    policy: RetryPolicy,
    rounds: BTreeMap<Round, RoundHistory>,
    loaded: bool,
}

impl RoundDataStore {
    pub fn new(start: Round, end: Round) -> Result<Self, StoreError> {
        if end < start {
            return Err(StoreError::InvalidRange { start, end });
        }
        Ok(Self {
            window: RoundWindow::new(start, end),
            policy: RetryPolicy::default(),
            rounds: BTreeMap::new(),
            loaded: false,
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// A loaded store over already-materialized histories (fixtures, replays).
    /// Every round of `[start, end]` must be present; rounds outside are dropped.
    pub fn from_histories(
        start: Round,
        end: Round,
        histories: impl IntoIterator<Item = RoundHistory>,
    ) -> Result<Self, StoreError> {
        let mut store = Self::new(start, end)?;
        let mut rounds: BTreeMap<Round, RoundHistory> = histories
            .into_iter()
            .map(|h| (h.round(), h))
            .collect();
        rounds.retain(|r, _| store.window.contains(*r));
        if let Some(missing) = store.window.rounds().find(|r| !rounds.contains_key(r)) {
            return Err(StoreError::MissingRound(missing));
        }
        store.rounds = rounds;
        store.loaded = true;
        Ok(store)
    }

    /// Fetch block, provider rewards and delegate rewards for every round of the
    /// range. At most `policy.concurrency` rounds are in flight; the next round
    /// is spawned only when one finishes. All-or-nothing: if any round exhausts
    /// its retries the cache is left as it was and `DataUnavailable` names that
    /// round.
    pub async fn load<S: LedgerSource>(&mut self, source: Arc<S>) -> Result<(), StoreError> {
        let limit = self.policy.concurrency.max(1);
        let mut pending = self.window.rounds();
        let mut tasks: JoinSet<(Round, Result<RoundHistory, FetchError>)> = JoinSet::new();
        for round in pending.by_ref().take(limit) {
            spawn_fetch(&mut tasks, &source, round, &self.policy);
        }

        let mut rounds = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (round, res) = joined.map_err(|e| StoreError::Task(e.to_string()))?;
            match res {
                Ok(history) => {
                    debug!(
                        round,
                        provider_records = history.provider_rewards.len(),
                        delegate_records = history.delegate_rewards.len(),
                        "round loaded"
                    );
                    rounds.insert(round, history);
                    if let Some(next) = pending.next() {
                        spawn_fetch(&mut tasks, &source, next, &self.policy);
                    }
                }
                Err(err) => {
                    tasks.abort_all();
                    warn!(round, error = %err, "round data unavailable, aborting load");
                    return Err(StoreError::DataUnavailable { round, source: err });
                }
            }
        }
        info!(
            start = self.window.start,
            end = self.window.end,
            rounds = rounds.len(),
            "round window loaded"
        );
        self.rounds = rounds;
        self.loaded = true;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn range(&self) -> RoundWindow {
        self.window
    }

    pub fn round_history(&self, round: Round) -> Result<&RoundHistory, StoreError> {
        let not_in_range = || StoreError::RoundNotInRange {
            round,
            start: self.window.start,
            end: self.window.end,
        };
        if !self.loaded || !self.window.contains(round) {
            return Err(not_in_range());
        }
        self.rounds.get(&round).ok_or_else(not_in_range)
    }

    /// Loaded rounds in ascending order.
    pub fn rounds(&self) -> impl Iterator<Item = &RoundHistory> {
        self.rounds.values()
    }

    pub fn fees_for_round(&self, round: Round) -> Result<Amount, StoreError> {
        Ok(self.round_history(round)?.fees())
    }

    pub fn total_fees(&self) -> Amount {
        self.rounds
            .values()
            .fold(0i64, |acc, h| acc.saturating_add(h.fees()))
    }

    pub fn times_won_best_miner(&self, provider_id: &str) -> usize {
        self.rounds
            .values()
            .filter(|h| h.block.miner_id == provider_id)
            .count()
    }
}

fn spawn_fetch<S: LedgerSource>(
    tasks: &mut JoinSet<(Round, Result<RoundHistory, FetchError>)>,
    source: &Arc<S>,
    round: Round,
    policy: &RetryPolicy,
) {
    let source = Arc::clone(source);
    let policy = policy.clone();
    tasks.spawn(async move { (round, fetch_round(source.as_ref(), round, &policy).await) });
}

async fn fetch_round<S: LedgerSource>(
    source: &S,
    round: Round,
    policy: &RetryPolicy,
) -> Result<RoundHistory, FetchError> {
    let block = with_retry(policy, round, "block", || source.block(round)).await?;
    if block.round != round {
        return Err(FetchError::Decode {
            what: "block",
            message: format!("asked for round {}, got {}", round, block.round),
        });
    }
    let provider_rewards =
        with_retry(policy, round, "provider rewards", || source.provider_rewards(round)).await?;
    let delegate_rewards =
        with_retry(policy, round, "delegate rewards", || source.delegate_rewards(round)).await?;
    Ok(RoundHistory::new(block, provider_rewards, delegate_rewards))
}

async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    round: Round,
    what: &'static str,
    mut call: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let timeout = Duration::from_millis(policy.timeout_ms);
    let mut last_err = None;
    for attempt in 0..=policy.max_retries {
        let err = match tokio::time::timeout(timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => FetchError::Timeout(policy.timeout_ms),
        };
        if attempt < policy.max_retries {
            let ms = policy.backoff_ms.saturating_mul(1u64 << attempt.min(16));
            warn!(round, what, attempt, ms, error = %err, "retry after error");
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        last_err = Some(err);
    }
    Err(last_err.unwrap_or(FetchError::Timeout(policy.timeout_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{EconomicParameters, ProviderSnapshot, Transaction};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn history(round: Round, miner: &str, fees: &[Amount]) -> RoundHistory {
        RoundHistory::new(
            Block {
                round,
                miner_id: miner.to_string(),
                transactions: fees
                    .iter()
                    .enumerate()
                    .map(|(i, fee)| Transaction {
                        hash: format!("tx{}-{}", round, i),
                        fee: *fee,
                    })
                    .collect(),
            },
            vec![
                ProviderRewardRecord {
                    provider_id: "s2".into(),
                    pool_id: None,
                    reward_type: RewardType::BlockRewardSharder,
                    amount: 50,
                },
                ProviderRewardRecord {
                    provider_id: miner.to_string(),
                    pool_id: None,
                    reward_type: RewardType::BlockRewardMiner,
                    amount: 10,
                },
            ],
            vec![],
        )
    }

    #[derive(Default)]
    struct FixtureLedger {
        rounds: BTreeMap<Round, RoundHistory>,
        fail_round: Option<Round>,
        failures_left: AtomicU32,
        delay_ms: u64,
        calls: AtomicU32,
        in_flight: AtomicU32,
        peak_in_flight: AtomicU32,
    }

    impl FixtureLedger {
        fn with_rounds(rounds: impl IntoIterator<Item = RoundHistory>) -> Self {
            Self {
                rounds: rounds.into_iter().map(|h| (h.round(), h)).collect(),
                ..Default::default()
            }
        }

        async fn get(&self, round: Round) -> Result<&RoundHistory, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            let res = self.get_inner(round).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            res
        }

        async fn get_inner(&self, round: Round) -> Result<&RoundHistory, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail_round == Some(round) {
                let left = self.failures_left.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures_left.store(left - 1, Ordering::SeqCst);
                    return Err(FetchError::Api(503, "busy".into()));
                }
            }
            self.rounds
                .get(&round)
                .ok_or_else(|| FetchError::NotFound(format!("round {}", round)))
        }
    }

    impl LedgerSource for FixtureLedger {
        async fn block(&self, round: Round) -> Result<Block, FetchError> {
            Ok(self.get(round).await?.block.clone())
        }

        async fn provider_rewards(
            &self,
            round: Round,
        ) -> Result<Vec<ProviderRewardRecord>, FetchError> {
            Ok(self.get(round).await?.provider_rewards.clone())
        }

        async fn delegate_rewards(
            &self,
            round: Round,
        ) -> Result<Vec<DelegateRewardRecord>, FetchError> {
            Ok(self.get(round).await?.delegate_rewards.clone())
        }

        async fn provider_snapshot(&self, id: &str) -> Result<ProviderSnapshot, FetchError> {
            Err(FetchError::NotFound(id.to_string()))
        }

        async fn economic_parameters(&self) -> Result<EconomicParameters, FetchError> {
            Err(FetchError::NotFound("settings".into()))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_ms: 1,
            timeout_ms: 1_000,
            concurrency: 3,
        }
    }

    #[test]
    fn new_rejects_reversed_range() {
        assert!(matches!(
            RoundDataStore::new(10, 9),
            Err(StoreError::InvalidRange { start: 10, end: 9 })
        ));
        assert!(RoundDataStore::new(10, 10).is_ok());
    }

    #[test]
    fn unloaded_store_answers_nothing() {
        let store = RoundDataStore::new(1, 3).unwrap();
        assert!(!store.is_loaded());
        assert!(matches!(
            store.round_history(2),
            Err(StoreError::RoundNotInRange { round: 2, .. })
        ));
    }

    #[tokio::test]
    async fn load_fetches_every_round() {
        let ledger = Arc::new(FixtureLedger::with_rounds(
            (1..=5).map(|r| history(r, if r % 2 == 0 { "m2" } else { "m1" }, &[r as Amount, 1])),
        ));
        let mut store = RoundDataStore::new(1, 5).unwrap().with_policy(fast_policy());
        store.load(ledger.clone()).await.unwrap();
        assert!(store.is_loaded());
        assert_eq!(store.rounds().count(), 5);
        assert_eq!(store.fees_for_round(3).unwrap(), 4);
        assert_eq!(store.total_fees(), (1 + 2 + 3 + 4 + 5) + 5);
        assert_eq!(store.times_won_best_miner("m1"), 3);
        assert_eq!(store.times_won_best_miner("m2"), 2);
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 15);

        // records come back sorted by type: miner block reward before sharder
        let h = store.round_history(1).unwrap();
        assert_eq!(h.provider_rewards[0].reward_type, RewardType::BlockRewardMiner);
        assert_eq!(h.primary_sharder(), Some("s2"));
        assert!(matches!(
            store.round_history(6),
            Err(StoreError::RoundNotInRange { round: 6, start: 1, end: 5 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn load_keeps_concurrency_bounded() {
        let mut ledger = FixtureLedger::with_rounds((1..=12).map(|r| history(r, "m1", &[1])));
        ledger.delay_ms = 20;
        let ledger = Arc::new(ledger);
        let policy = fast_policy();
        let mut store = RoundDataStore::new(1, 12).unwrap().with_policy(policy.clone());
        store.load(ledger.clone()).await.unwrap();
        assert_eq!(store.rounds().count(), 12);
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 36);
        let peak = usize::try_from(ledger.peak_in_flight.load(Ordering::SeqCst)).unwrap();
        assert!(peak <= policy.concurrency, "peak {} > {}", peak, policy.concurrency);
        assert!(peak >= 2, "rounds were fetched one at a time");
        assert_eq!(ledger.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn load_twice_is_idempotent() {
        let ledger = Arc::new(FixtureLedger::with_rounds((7..=9).map(|r| history(r, "m1", &[]))));
        let mut store = RoundDataStore::new(7, 9).unwrap().with_policy(fast_policy());
        store.load(ledger.clone()).await.unwrap();
        let first: Vec<RoundHistory> = store.rounds().cloned().collect();
        store.load(ledger).await.unwrap();
        let second: Vec<RoundHistory> = store.rounds().cloned().collect();
        assert_eq!(first, second);
        assert_eq!(second.len(), 3);
        assert_eq!(store.fees_for_round(8).unwrap(), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mut ledger = FixtureLedger::with_rounds((1..=3).map(|r| history(r, "m1", &[5])));
        ledger.fail_round = Some(2);
        ledger.failures_left = AtomicU32::new(2);
        let mut store = RoundDataStore::new(1, 3).unwrap().with_policy(fast_policy());
        store.load(Arc::new(ledger)).await.unwrap();
        assert_eq!(store.fees_for_round(2).unwrap(), 5);
    }

    #[tokio::test]
    async fn exhausted_retries_abort_the_whole_load() {
        let mut ledger = FixtureLedger::with_rounds((1..=3).map(|r| history(r, "m1", &[5])));
        ledger.fail_round = Some(3);
        ledger.failures_left = AtomicU32::new(100);
        let mut store = RoundDataStore::new(1, 3).unwrap().with_policy(fast_policy());
        let err = store.load(Arc::new(ledger)).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DataUnavailable {
                round: 3,
                source: FetchError::Api(503, _)
            }
        ));
        assert!(!store.is_loaded());
        assert!(store.round_history(1).is_err());
    }

    #[tokio::test]
    async fn slow_source_times_out() {
        let mut ledger = FixtureLedger::with_rounds([history(1, "m1", &[])]);
        ledger.delay_ms = 200;
        let policy = RetryPolicy {
            max_retries: 1,
            backoff_ms: 1,
            timeout_ms: 10,
            concurrency: 1,
        };
        let mut store = RoundDataStore::new(1, 1).unwrap().with_policy(policy);
        let err = store.load(Arc::new(ledger)).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DataUnavailable {
                round: 1,
                source: FetchError::Timeout(10)
            }
        ));
    }

    #[test]
    fn from_histories_requires_every_round() {
        let err = RoundDataStore::from_histories(1, 3, [history(1, "m", &[]), history(3, "m", &[])])
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingRound(2)));
        let store = RoundDataStore::from_histories(
            2,
            3,
            [history(1, "m", &[]), history(2, "m", &[]), history(3, "m", &[])],
        )
        .unwrap();
        assert!(store.is_loaded());
        assert_eq!(store.rounds().count(), 2);
    }

    #[test]
    fn sharder_winners_are_ordered() {
        let mut h = history(1, "m1", &[]);
        h.provider_rewards.push(ProviderRewardRecord {
            provider_id: "s1".into(),
            pool_id: None,
            reward_type: RewardType::BlockRewardSharder,
            amount: 50,
        });
        let h = RoundHistory::new(h.block, h.provider_rewards, h.delegate_rewards);
        assert_eq!(h.winning_sharders().into_iter().collect::<Vec<_>>(), vec!["s1", "s2"]);
        assert_eq!(h.primary_sharder(), Some("s1"));
        assert!(h.is_winner(ProviderTier::Sharder, "s2"));
        assert!(h.is_winner(ProviderTier::Miner, "m1"));
        assert!(!h.is_winner(ProviderTier::Miner, "s1"));
    }
}
