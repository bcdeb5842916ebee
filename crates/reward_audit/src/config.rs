//! Audit run configuration: sharder endpoint, rate limit and retry policy.
//!
//! Load from: env `REWARD_AUDIT_CONFIG_PATH`, or `./config/reward_audit.json`, or
//! `./reward_audit.json`. Missing files fall back to defaults; a file that
//! exists but does not parse or validate is an error.

use crate::chain::FetchConfig;
use crate::store::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

pub const CONFIG_PATH_ENV: &str = "REWARD_AUDIT_CONFIG_PATH";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid base_url {0:?}: {1}")]
    BaseUrl(String, url::ParseError),
    #[error("unsupported base_url scheme {0:?}")]
    Scheme(String),
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Sharder REST base URL.
    pub base_url: String,
    /// Minimum spacing between requests; 0 disables.
    pub rate_limit_ms: u64,
    /// reqwest client timeout.
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    /// Per-attempt timeout in the round store.
    pub timeout_ms: u64,
    /// Rounds fetched in parallel.
    pub concurrency: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        let fetch = FetchConfig::default();
        let retry = RetryPolicy::default();
        Self {
            base_url: fetch.base_url,
            rate_limit_ms: fetch.rate_limit_ms,
            request_timeout_ms: fetch.request_timeout_ms,
            max_retries: retry.max_retries,
            backoff_ms: retry.backoff_ms,
            timeout_ms: retry.timeout_ms,
            concurrency: retry.concurrency,
        }
    }
}

impl AuditConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load config: env REWARD_AUDIT_CONFIG_PATH, then ./config/reward_audit.json,
    /// then ./reward_audit.json, else defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let p = Path::new(&path);
            if p.exists() {
                return Self::load_from_path(p);
            }
            tracing::warn!(path = %p.display(), "config path from env does not exist");
        }
        for candidate in [
            Path::new("./config/reward_audit.json"),
            Path::new("./reward_audit.json"),
        ] {
            if candidate.exists() {
                return Self::load_from_path(candidate);
            }
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::BaseUrl(self.base_url.clone(), e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Scheme(url.scheme().to_string()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            base_url: self.base_url.clone(),
            rate_limit_ms: self.rate_limit_ms,
            request_timeout_ms: self.request_timeout_ms,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_ms: self.backoff_ms,
            timeout_ms: self.timeout_ms,
            concurrency: self.concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"base_url":"https://sharder.example:7171","concurrency":2}}"#).unwrap();
        let c = AuditConfig::load_from_path(f.path()).unwrap();
        assert_eq!(c.base_url, "https://sharder.example:7171");
        assert_eq!(c.concurrency, 2);
        assert_eq!(c.max_retries, RetryPolicy::default().max_retries);
        assert_eq!(c.retry_policy().concurrency, 2);
        assert_eq!(c.fetch_config().base_url, c.base_url);
    }

    #[test]
    fn rejects_bad_url_and_zero_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let bad_url = dir.path().join("a.json");
        std::fs::write(&bad_url, r#"{"base_url":"not a url"}"#).unwrap();
        assert!(matches!(
            AuditConfig::load_from_path(&bad_url),
            Err(ConfigError::BaseUrl(..))
        ));
        let ftp = dir.path().join("b.json");
        std::fs::write(&ftp, r#"{"base_url":"ftp://host"}"#).unwrap();
        assert!(matches!(
            AuditConfig::load_from_path(&ftp),
            Err(ConfigError::Scheme(_))
        ));
        let zero = dir.path().join("c.json");
        std::fs::write(&zero, r#"{"concurrency":0}"#).unwrap();
        assert!(matches!(
            AuditConfig::load_from_path(&zero),
            Err(ConfigError::ZeroConcurrency)
        ));
    }

    #[test]
    fn malformed_or_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("broken.json");
        std::fs::write(&p, "{").unwrap();
        assert!(matches!(
            AuditConfig::load_from_path(&p),
            Err(ConfigError::Json { .. })
        ));
        assert!(matches!(
            AuditConfig::load_from_path(&dir.path().join("absent.json")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn defaults_validate() {
        AuditConfig::default().validate().unwrap();
    }
}
