//! The ledger-query capability the rest of the crate is written against.

use crate::chain::fetch::FetchError;
use crate::ledger::{
    Block, DelegateRewardRecord, EconomicParameters, ProviderRewardRecord, ProviderSnapshot, Round,
};
use std::future::Future;

/// Read-only access to a ledger node. [`crate::chain::LedgerClient`] talks HTTP;
/// tests plug in fixture-backed implementations.
pub trait LedgerSource: Send + Sync + 'static {
    fn block(&self, round: Round) -> impl Future<Output = Result<Block, FetchError>> + Send;

    fn provider_rewards(
        &self,
        round: Round,
    ) -> impl Future<Output = Result<Vec<ProviderRewardRecord>, FetchError>> + Send;

    fn delegate_rewards(
        &self,
        round: Round,
    ) -> impl Future<Output = Result<Vec<DelegateRewardRecord>, FetchError>> + Send;

    fn provider_snapshot(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<ProviderSnapshot, FetchError>> + Send;

    fn economic_parameters(
        &self,
    ) -> impl Future<Output = Result<EconomicParameters, FetchError>> + Send;
}
