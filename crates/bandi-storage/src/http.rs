//! Tiered HTTP fetch: plain client, then a browser-like bypass client, then
//! relaxed TLS verification as a last resort.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0",
];

const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    ),
    ("Accept-Language", "it-IT,it;q=0.9,en-US;q=0.8,en;q=0.7"),
    ("Cache-Control", "no-cache"),
    ("Pragma", "no-cache"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Upgrade-Insecure-Requests", "1"),
];

const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf_chl_opt",
    "<title>Just a moment...</title>",
    "Attention Required! | Cloudflare",
    "cf-error-details",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("tls failure for {url}: {message}")]
    Ssl { url: String, message: String },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("blocked by challenge page (status {status}) at {url}")]
    Blocked { status: u16, url: String },
    #[error("request to {url} failed: {message}")]
    Unexpected { url: String, message: String },
    #[error("building http client: {0}")]
    ClientBuild(String),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Ssl { .. } => "ssl",
            Self::HttpStatus { .. } => "http_status",
            Self::Blocked { .. } => "blocked",
            Self::Unexpected { .. } => "unexpected",
            Self::ClientBuild(_) => "client_build",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } | Self::Blocked { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    Standard,
    Bypass,
    RelaxedTls,
}

impl FetchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Bypass => "bypass",
            Self::RelaxedTls => "relaxed_tls",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the uniform random extra added to each delay.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    /// `delay_for_attempt` plus jitter, still capped at `max_delay`.
    pub fn jittered_delay(&self, attempt_index: usize) -> Duration {
        let base = self.delay_for_attempt(attempt_index);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        let extra = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        base.saturating_add(extra).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub bypass_connect_timeout: Duration,
    pub bypass_read_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub retry_statuses: Vec<u16>,
    pub user_agents: Vec<String>,
    pub enable_bypass: bool,
    pub enable_relaxed_tls: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            bypass_connect_timeout: Duration::from_secs(15),
            bypass_read_timeout: Duration::from_secs(45),
            backoff: BackoffPolicy::default(),
            retry_statuses: Self::base_retry_statuses(true),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            enable_bypass: true,
            enable_relaxed_tls: true,
        }
    }
}

impl HttpClientConfig {
    /// `429, 500, 502, 503, 504`, plus Cloudflare's `525..=528` when asked.
    pub fn base_retry_statuses(cloudflare: bool) -> Vec<u16> {
        let mut statuses = vec![429, 500, 502, 503, 504];
        if cloudflare {
            statuses.extend(525..=528);
        }
        statuses
    }

    pub fn classify_status(&self, status: u16) -> RetryDisposition {
        if self.retry_statuses.contains(&status) {
            RetryDisposition::Retryable
        } else {
            RetryDisposition::NonRetryable
        }
    }

    pub fn pick_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENTS[0])
    }
}

/// One outbound request. `form` turns it into a urlencoded POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub form: Option<Vec<(String, String)>>,
    pub headers: Vec<(String, String)>,
}

impl PageRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            form: None,
            headers: Vec::new(),
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            url: url.into(),
            form: Some(form),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMetadata {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
    pub final_status: Option<u16>,
    pub error_type: Option<String>,
    pub method_used: Option<FetchMethod>,
}

impl FetchMetadata {
    pub fn start(url: &str) -> Self {
        Self {
            url: url.to_string(),
            timestamp: Utc::now(),
            attempts: 0,
            final_status: None,
            error_type: None,
            method_used: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub body: String,
    pub metadata: FetchMetadata,
}

/// A single client strategy.
#[async_trait]
pub trait Transport: Send + Sync {
    fn method(&self) -> FetchMethod;

    async fn send(
        &self,
        request: &PageRequest,
        user_agent: &str,
    ) -> Result<RawResponse, FetchError>;
}

/// Anything that can turn a [`PageRequest`] into a page body.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<FetchedPage, FetchError>;
}

/// True for a 403, or for any body carrying a Cloudflare challenge marker.
pub fn is_challenge_page(status: u16, body: &str) -> bool {
    status == 403 || CHALLENGE_MARKERS.iter().any(|m| body.contains(m))
}

#[derive(Debug)]
pub struct ReqwestTransport {
    method: FetchMethod,
    client: reqwest::Client,
    browser_headers: bool,
}

impl ReqwestTransport {
    pub fn standard(config: &HttpClientConfig) -> Result<Self, FetchError> {
        let client = Self::builder(config.connect_timeout, config.read_timeout)
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;
        Ok(Self {
            method: FetchMethod::Standard,
            client,
            browser_headers: false,
        })
    }

    /// Longer timeouts, a cookie jar and a full browser header set.
    pub fn bypass(config: &HttpClientConfig) -> Result<Self, FetchError> {
        let client = Self::builder(config.bypass_connect_timeout, config.bypass_read_timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;
        Ok(Self {
            method: FetchMethod::Bypass,
            client,
            browser_headers: true,
        })
    }

    pub fn relaxed_tls(config: &HttpClientConfig) -> Result<Self, FetchError> {
        let client = Self::builder(config.connect_timeout, config.read_timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;
        Ok(Self {
            method: FetchMethod::RelaxedTls,
            client,
            browser_headers: false,
        })
    }

    fn builder(connect_timeout: Duration, read_timeout: Duration) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
    }
}

fn classify_reqwest_error(url: &str, err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout {
            url: url.to_string(),
        };
    }
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        chain.push_str(": ");
        chain.push_str(&inner.to_string());
        source = inner.source();
    }
    let lowered = chain.to_lowercase();
    if ["certificate", "tls", "ssl", "handshake"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        return FetchError::Ssl {
            url: url.to_string(),
            message: chain,
        };
    }
    FetchError::Unexpected {
        url: url.to_string(),
        message: chain,
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn method(&self) -> FetchMethod {
        self.method
    }

    async fn send(
        &self,
        request: &PageRequest,
        user_agent: &str,
    ) -> Result<RawResponse, FetchError> {
        let mut builder = match &request.form {
            Some(form) => self.client.post(&request.url).form(form),
            None => self.client.get(&request.url),
        };
        builder = builder.header(reqwest::header::USER_AGENT, user_agent);
        if self.browser_headers {
            for (name, value) in BROWSER_HEADERS {
                builder = builder.header(*name, *value);
            }
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&request.url, &e))?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&request.url, &e))?;
        Ok(RawResponse {
            status,
            final_url,
            body,
        })
    }
}

pub struct TieredFetcher {
    tiers: Vec<Box<dyn Transport>>,
    config: HttpClientConfig,
}

impl std::fmt::Debug for TieredFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tiers: Vec<_> = self.tiers.iter().map(|t| t.method()).collect();
        f.debug_struct("TieredFetcher")
            .field("tiers", &tiers)
            .field("config", &self.config)
            .finish()
    }
}

impl TieredFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut tiers: Vec<Box<dyn Transport>> =
            vec![Box::new(ReqwestTransport::standard(&config)?)];
        if config.enable_bypass {
            tiers.push(Box::new(ReqwestTransport::bypass(&config)?));
        }
        if config.enable_relaxed_tls {
            tiers.push(Box::new(ReqwestTransport::relaxed_tls(&config)?));
        }
        Ok(Self { tiers, config })
    }

    pub fn with_transports(config: HttpClientConfig, tiers: Vec<Box<dyn Transport>>) -> Self {
        Self { tiers, config }
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// A failed tier hands over to the next one unless the server gave a
    /// definitive non-retryable answer (404, 410, ...).
    fn escalates(&self, err: &FetchError) -> bool {
        match err {
            FetchError::HttpStatus { status, .. } => {
                self.config.classify_status(*status) == RetryDisposition::Retryable
            }
            FetchError::ClientBuild(_) => false,
            _ => true,
        }
    }

    fn retries_within_tier(err: &FetchError) -> bool {
        matches!(err, FetchError::Timeout { .. } | FetchError::Unexpected { .. })
    }

    async fn run_tier(
        &self,
        tier: &dyn Transport,
        request: &PageRequest,
        metadata: &mut FetchMetadata,
    ) -> Result<RawResponse, FetchError> {
        let max_retries = self.config.backoff.max_retries;
        let mut attempt = 0;
        loop {
            metadata.attempts += 1;
            let user_agent = self.config.pick_user_agent();
            debug!(tier = tier.method().as_str(), attempt, "sending request");

            let outcome = match tier.send(request, user_agent).await {
                Ok(resp) => {
                    metadata.final_status = Some(resp.status);
                    info!(
                        tier = tier.method().as_str(),
                        attempt,
                        status = resp.status,
                        "fetch attempt"
                    );
                    if is_challenge_page(resp.status, &resp.body) {
                        return Err(FetchError::Blocked {
                            status: resp.status,
                            url: resp.final_url,
                        });
                    }
                    if (200..300).contains(&resp.status) {
                        return Ok(resp);
                    }
                    let err = FetchError::HttpStatus {
                        status: resp.status,
                        url: resp.final_url,
                    };
                    if self.config.classify_status(resp.status) == RetryDisposition::NonRetryable {
                        return Err(err);
                    }
                    err
                }
                Err(err) => {
                    warn!(
                        tier = tier.method().as_str(),
                        attempt,
                        error = %err,
                        "fetch attempt failed"
                    );
                    if !Self::retries_within_tier(&err) {
                        return Err(err);
                    }
                    err
                }
            };

            if attempt >= max_retries {
                return Err(outcome);
            }
            tokio::time::sleep(self.config.backoff.jittered_delay(attempt)).await;
            attempt += 1;
        }
    }

    pub async fn fetch(&self, request: &PageRequest) -> Result<FetchedPage, FetchError> {
        let span = info_span!("http_fetch", url = %request.url);
        async {
            let mut metadata = FetchMetadata::start(&request.url);
            let mut last_error = None;

            for tier in &self.tiers {
                match self.run_tier(tier.as_ref(), request, &mut metadata).await {
                    Ok(resp) => {
                        metadata.method_used = Some(tier.method());
                        metadata.error_type = None;
                        return Ok(FetchedPage {
                            final_url: resp.final_url,
                            body: resp.body,
                            metadata,
                        });
                    }
                    Err(err) => {
                        metadata.error_type = Some(err.kind().to_string());
                        if !self.escalates(&err) {
                            warn!(?metadata, error = %err, "fetch failed");
                            return Err(err);
                        }
                        warn!(
                            tier = tier.method().as_str(),
                            error = %err,
                            "tier exhausted, falling back"
                        );
                        last_error = Some(err);
                    }
                }
            }

            let err = last_error.unwrap_or_else(|| FetchError::Unexpected {
                url: request.url.clone(),
                message: "no fetch tiers configured".to_string(),
            });
            warn!(?metadata, error = %err, "all fetch tiers failed");
            Err(err)
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl PageFetcher for TieredFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> Result<FetchedPage, FetchError> {
        self.fetch(request).await
    }
}
