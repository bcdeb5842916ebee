//! reward_audit: reconstructs per-round block and fee rewards for miners,
//! sharders and their delegate pools, and cross-checks them against the
//! ledger's reward records and the providers' balance deltas.
//!
//! Read-only; talks to a sharder REST API through [`chain::LedgerSource`].

pub mod chain;
pub mod config;
pub mod ledger;
pub mod model;
pub mod report;
pub mod store;
pub mod verify;

pub use chain::{FetchConfig, FetchError, LedgerClient, LedgerSource};
pub use config::{AuditConfig, ConfigError};
pub use ledger::{EconomicParameters, ProviderSnapshot, ProviderTier, RoundWindow, SnapshotSet};
pub use report::ReportData;
pub use store::{RetryPolicy, RoundDataStore, RoundHistory, StoreError};
pub use verify::{
    reproducibility_hash, AuditBundle, ConsistencyVerifier, Failure, Rule, VerificationReport,
    VerifyError,
};
