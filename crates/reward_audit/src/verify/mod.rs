//! Ledger consistency checks, their collected report, and the audit bundle.

mod bundle;
mod consistency;
mod report;

pub use bundle::normalize_for_hash;
pub use bundle::{
    reproducibility_hash, verify_bundle_hash, AuditBundle, BundleError, HashCheck, ProviderSummary,
};
pub use consistency::{
    ConsistencyVerifier, VerifyError, CHECK_DELEGATE_POOL_REWARDS, CHECK_FEE_REWARDS,
    CHECK_PROVIDER_BLOCK_REWARDS, CHECK_ROUND_REWARD_FREQUENCY,
};
pub use report::{Failure, Rule, VerificationReport};
