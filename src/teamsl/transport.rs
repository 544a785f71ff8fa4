//! HTTP transport for the TeamSL website, plus retry and status classification.
//!
//! The [`Transport`] trait is the only thing that touches the network; tests
//! swap in a scripted implementation.

use crate::teamsl::adapters::AdapterKind;
use crate::teamsl::errors::{TransportError, UpstreamError};
use crate::utils::{fmt_duration, log_if_slow};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use http::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use url::Url;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// HTTP statuses the legacy pages answer with once a search session is gone.
const SESSION_EXPIRED_STATUSES: [u16; 3] = [401, 419, 440];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Body,
}

impl UpstreamRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    pub fn post_form(url: Url, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url,
            headers: HeaderMap::new(),
            body: Body::Form(fields),
        }
    }

    pub fn post_json(url: Url, value: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url,
            headers: HeaderMap::new(),
            body: Body::Json(value),
        }
    }

    /// Set a header, replacing any previous value. Invalid values are skipped.
    pub fn header(mut self, name: HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => warn!(header = %name, "Dropping header with invalid value"),
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError>;
}

/// Production transport: one shared `reqwest` client, no ambient cookie store,
/// all requests spaced by a direct rate limiter.
pub struct HttpTransport {
    http: reqwest::Client,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl HttpTransport {
    pub fn new(timeout: Duration, min_interval: Duration) -> Result<Self, reqwest::Error> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("de-DE,de;q=0.9,en;q=0.8"),
        );

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(default_headers)
            .timeout(timeout)
            .build()?;

        let limiter = Quota::with_period(min_interval).map(RateLimiter::direct);

        Ok(Self { http, limiter })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let url = request.url.to_string();
        let builder = match request.method {
            Method::Get => self.http.get(request.url),
            Method::Post => self.http.post(request.url),
        }
        .headers(request.headers);

        let builder = match request.body {
            Body::Empty => builder,
            Body::Form(fields) => builder.form(&fields),
            Body::Json(value) => builder.json(&value),
        };

        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;

        trace!(url, status, bytes = body.len(), duration = fmt_duration(start.elapsed()), "Upstream response");
        log_if_slow(start, Duration::from_secs(3), "upstream request");

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No retries at all; used by tests that script exact request sequences.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            factor: 1,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32, err: &UpstreamError) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(self.factor.saturating_pow(retry))
            .min(self.max_delay);

        match err {
            UpstreamError::RateLimited { retry_after, .. } => {
                let jitter_ms = rand::rng().random_range(0..=self.base_delay.as_millis() as u64);
                retry_after.unwrap_or(backoff).max(backoff) + Duration::from_millis(jitter_ms)
            }
            _ => backoff,
        }
    }
}

/// Map an HTTP status to success or a typed failure.
///
/// Rate limiting is a bare 429, or a 403/503 carrying `Retry-After`.
pub fn classify_status(
    adapter: AdapterKind,
    response: &UpstreamResponse,
) -> Result<(), UpstreamError> {
    let status = response.status;
    if response.is_success() {
        return Ok(());
    }

    let retry_after = response.retry_after();
    if status == 429 || (matches!(status, 403 | 503) && retry_after.is_some()) {
        return Err(UpstreamError::RateLimited {
            adapter,
            status,
            retry_after,
        });
    }
    if SESSION_EXPIRED_STATUSES.contains(&status) {
        return Err(UpstreamError::session_expired(
            adapter,
            format!("HTTP {status}"),
        ));
    }
    if status >= 500 {
        return Err(UpstreamError::transient(adapter, format!("HTTP {status}")));
    }
    Err(UpstreamError::format(
        adapter,
        format!("unexpected HTTP status {status}"),
    ))
}

/// Shared handle adapters use to reach the upstream: transport, retry policy
/// and base URL.
#[derive(Clone)]
pub struct Upstream {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    base_url: Url,
}

impl Upstream {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy, base_url: Url) -> Self {
        Self {
            transport,
            retry,
            base_url,
        }
    }

    /// Resolve a path (with optional query) against the base URL.
    pub fn url(&self, adapter: AdapterKind, path: &str) -> Result<Url, UpstreamError> {
        self.base_url
            .join(path)
            .map_err(|e| UpstreamError::format(adapter, format!("invalid url {path}: {e}")))
    }

    /// Send with retries, returning only classified-successful responses.
    pub async fn execute(
        &self,
        adapter: AdapterKind,
        request: UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut retry = 0;
        loop {
            let result = self.send_once(adapter, request.clone()).await;
            match result {
                Err(err) if err.is_retryable() && retry < self.retry.max_retries => {
                    let delay = self.retry.delay_for(retry, &err);
                    warn!(
                        %adapter,
                        url = %request.url,
                        retry = retry + 1,
                        max_retries = self.retry.max_retries,
                        delay = fmt_duration(delay),
                        error = %err,
                        "Retrying upstream request"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                other => return other,
            }
        }
    }

    async fn send_once(
        &self,
        adapter: AdapterKind,
        request: UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        debug!(%adapter, method = ?request.method, url = %request.url, "Upstream request");
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| UpstreamError::from_transport(adapter, e))?;
        classify_status(adapter, &response)?;
        Ok(response)
    }
}
