//! Audit bundle and SHA-256 reproducibility hash.

use crate::ledger::{Amount, EconomicParameters, ProviderTier, RoundWindow};
use crate::verify::report::VerificationReport;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-provider summary carried in the bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub tier: ProviderTier,
    pub window: RoundWindow,
    pub rounds_won: usize,
    pub reward_delta: Amount,
}

/// Inputs + outcome of one audit run, for archiving and re-checking.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditBundle {
    pub version: u32,
    pub created_utc_rfc3339: String,
    pub params: EconomicParameters,
    /// Rounds loaded from the ledger.
    pub round_range: RoundWindow,
    pub total_fees: Amount,
    /// Keyed by provider id.
    pub providers: BTreeMap<String, ProviderSummary>,
    pub report: VerificationReport,
}

const BUNDLE_VERSION: u32 = 1;

impl AuditBundle {
    pub fn new(
        params: EconomicParameters,
        round_range: RoundWindow,
        total_fees: Amount,
        providers: BTreeMap<String, ProviderSummary>,
        report: VerificationReport,
    ) -> Self {
        let created_utc_rfc3339 = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        Self {
            version: BUNDLE_VERSION,
            created_utc_rfc3339,
            params,
            round_range,
            total_fees,
            providers,
            report,
        }
    }

    pub fn passed(&self) -> bool {
        self.report.passed()
    }
}

/// Normalize JSON for hashing: sort keys and no whitespace.
pub fn normalize_for_hash(value: &serde_json::Value) -> Result<String, BundleError> {
    Ok(serde_json::to_string(&sort_json_keys(value))?)
}

fn sort_json_keys(v: &serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(m) => {
            let sorted: BTreeMap<&String, serde_json::Value> =
                m.iter().map(|(k, v)| (k, sort_json_keys(v))).collect();
            serde_json::Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), v))
                    .collect(),
            )
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sort_json_keys).collect())
        }
        other => other.clone(),
    }
}

/// SHA-256 over the normalized bundle JSON. The creation timestamp is excluded
/// so two runs over the same ledger data hash identically.
pub fn reproducibility_hash(bundle: &AuditBundle) -> Result<String, BundleError> {
    let mut json = serde_json::to_value(bundle)?;
    if let Some(obj) = json.as_object_mut() {
        obj.remove("created_utc_rfc3339");
    }
    let normalized = normalize_for_hash(&json)?;
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HashCheck {
    pub bundle_hash: String,
    pub expected_hash: Option<String>,
    pub matches: bool,
}

/// Compare a bundle against the content of its `.sha256` file.
pub fn verify_bundle_hash(
    bundle: &AuditBundle,
    expected_hex: Option<&str>,
) -> Result<HashCheck, BundleError> {
    let bundle_hash = reproducibility_hash(bundle)?;
    let expected = expected_hex.map(|e| e.trim().to_lowercase());
    let matches = expected.as_deref() == Some(bundle_hash.as_str());
    Ok(HashCheck {
        bundle_hash,
        expected_hash: expected,
        matches,
    })
}
