//! Sharder REST client with rate limiting. One attempt per call; retries are
//! owned by [`crate::store::RoundDataStore`].

use crate::chain::source::LedgerSource;
use crate::ledger::{
    Block, DelegateRewardRecord, EconomicParameters, ParamsError, ProviderRewardRecord,
    ProviderSnapshot, Round,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;
use url::Url;

const DEFAULT_SHARDER_URL: &str = "http://localhost:7171";
/// Miner smart contract address; rewards, node stats and settings live under it.
pub const MINER_SC_ADDRESS: &str =
    "6dba10422e368813802877a85039d3985d96760ed844092319743fb3a76712d1";
const RATE_LIMIT_MS: u64 = 0;
const REQUEST_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone, Debug)]
pub struct FetchConfig {
    pub base_url: String,
    pub rate_limit_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SHARDER_URL.to_string(),
            rate_limit_ms: RATE_LIMIT_MS,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
        }
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api error: status {0} body {1}")]
    Api(u16, String),
    #[error("decode {what}: {message}")]
    Decode { what: &'static str, message: String },
    #[error("parameters: {0}")]
    Params(#[from] ParamsError),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Deserialize)]
struct BlockResponse {
    block: Block,
}

#[derive(Deserialize)]
struct SettingsResponse {
    fields: BTreeMap<String, String>,
}

/// HTTP implementation of [`LedgerSource`] against one sharder.
pub struct LedgerClient {
    config: FetchConfig,
    base_url: Url,
    client: reqwest::Client,
    /// Send time reserved by the most recent request.
    next_slot: Mutex<Option<OffsetDateTime>>,
    request_count: AtomicU64,
}

impl LedgerClient {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.base_url)?;
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            config,
            base_url,
            client,
            next_slot: Mutex::new(None),
            request_count: AtomicU64::new(0),
        })
    }

    /// Waits for this request's send slot. Each caller reserves
    /// `max(now, previous slot + rate_limit_ms)` under the lock, so concurrent
    /// callers are spaced out instead of released together.
    async fn rate_limit(&self) {
        if self.config.rate_limit_ms == 0 {
            return;
        }
        let spacing = time::Duration::milliseconds(
            i64::try_from(self.config.rate_limit_ms).unwrap_or(i64::MAX),
        );
        let wait = {
            let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = OffsetDateTime::now_utc();
            let slot = match *next {
                Some(prev) => (prev + spacing).max(now),
                None => now,
            };
            *next = Some(slot);
            slot - now
        };
        if wait.is_positive() {
            let ms = u64::try_from(wait.whole_milliseconds()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn sc_path(endpoint: &str) -> String {
        format!("/v1/screst/{}/{}", MINER_SC_ADDRESS, endpoint)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        what: &'static str,
    ) -> Result<T, FetchError> {
        self.rate_limit().await;
        let url = self.url_for(path);
        debug!(%url, "GET");
        let res = self.client.get(&url).send().await?;
        let status = res.status();
        let body = res.text().await?;
        if status.as_u16() == 404 {
            return Err(FetchError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Api(status.as_u16(), body));
        }
        self.request_count.fetch_add(1, Ordering::Relaxed);
        decode(&body, what)
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}

/// Decode a response body, keeping the target name in the error.
pub fn decode<T: DeserializeOwned>(body: &str, what: &'static str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Decode {
        what,
        message: e.to_string(),
    })
}

impl LedgerSource for LedgerClient {
    async fn block(&self, round: Round) -> Result<Block, FetchError> {
        let path = format!("/v1/block/get?round={}&content=full", round);
        let res: BlockResponse = self.get_json(&path, "block").await?;
        Ok(res.block)
    }

    async fn provider_rewards(&self, round: Round) -> Result<Vec<ProviderRewardRecord>, FetchError> {
        let path = format!("{}?round={}", Self::sc_path("provider-rewards"), round);
        self.get_json(&path, "provider rewards").await
    }

    async fn delegate_rewards(&self, round: Round) -> Result<Vec<DelegateRewardRecord>, FetchError> {
        let path = format!("{}?round={}", Self::sc_path("delegate-rewards"), round);
        self.get_json(&path, "delegate rewards").await
    }

    async fn provider_snapshot(&self, id: &str) -> Result<ProviderSnapshot, FetchError> {
        let path = format!(
            "{}?id={}",
            Self::sc_path("nodeStat"),
            urlencoding::encode(id)
        );
        self.get_json(&path, "provider snapshot").await
    }

    async fn economic_parameters(&self) -> Result<EconomicParameters, FetchError> {
        let res: SettingsResponse = self
            .get_json(&Self::sc_path("globalSettings"), "global settings")
            .await?;
        Ok(EconomicParameters::from_settings(&res.fields)?)
    }
}
