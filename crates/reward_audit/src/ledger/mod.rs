//! Ledger data: blocks, reward records, provider snapshots, economic parameters.

mod params;
mod types;

pub use params::{EconomicParameters, ParamsError};
pub use types::{
    Amount, Block, DelegatePool, DelegateRewardRecord, ProviderRewardRecord, ProviderSnapshot,
    ProviderTier, RewardType, Round, RoundWindow, SnapshotSet, Transaction, UNITS_PER_TOKEN,
};
