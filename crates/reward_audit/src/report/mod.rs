//! Report data structure (HTML is generated in the reward_audit_report crate).

use crate::verify::AuditBundle;
use serde::{Deserialize, Serialize};

/// Data passed to the HTML report generator: bundle + reproducibility hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportData {
    pub bundle: AuditBundle,
    pub reproducibility_hash_sha256: String,
}
