//! # API Client
//!
//! A thin `reqwest` wrapper for the game-world API. Every request is gated by
//! the shared [`RateLimiter`] and feeds the response headers back into it.
//! The client never retries; callers get [`RequestError::RateLimited`] with a
//! wait hint and decide for themselves.
//!
//! Responses are small XML documents made of named shards
//! (`<FOUNDEDTIME>1700000000</FOUNDEDTIME>`); [`ShardDocument`] pulls them out
//! by tag name.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::event::canonicalize;
use crate::error::RequestError;
use crate::retrieve::ratelimit::{RateLimiter, RateSnapshot};

pub const DEFAULT_API_URL: &str = "https://www.nationstates.net/cgi-bin/api.cgi";

static NEW_NATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<NEWNATION\s+name="(?P<name>[^"]*)"\s*>(?P<body>.*?)</NEWNATION>"#)
        .expect("newnation pattern is valid")
});

/// A parsed API response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDocument {
    body: String,
}

impl ShardDocument {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Text of the first `<NAME>..</NAME>` element, trimmed. Tag names are
    /// matched case-insensitively.
    pub fn shard(&self, name: &str) -> Option<String> {
        shard_in(&self.body, name)
    }

    /// Entries of a `newnationdetails` response, in document order.
    /// Malformed entries are skipped.
    pub fn new_nations(&self) -> Vec<NewNation> {
        NEW_NATION
            .captures_iter(&self.body)
            .filter_map(|caps| {
                let body = caps.name("body")?.as_str();
                let founded = shard_in(body, "FOUNDEDTIME")?.parse::<i64>().ok()?;
                Some(NewNation {
                    name: canonicalize(&caps["name"]),
                    region: canonicalize(&shard_in(body, "REGION")?),
                    founded_at: DateTime::from_timestamp(founded, 0)?,
                })
            })
            .collect()
    }
}

fn shard_in(body: &str, name: &str) -> Option<String> {
    let pattern = format!(r"(?is)<{0}>(.*?)</{0}>", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// One entry of the new-nations shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNation {
    pub name: String,
    pub region: String,
    pub founded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NsClientConfig {
    /// Absolute URL of the API endpoint; queries are appended to it.
    pub base_url: Url,
    /// The API requires a descriptive agent naming the operator.
    pub user_agent: String,
    /// Local cap on requests inside one policy window.
    pub period_max: usize,
    pub timeout: Duration,
}

impl NsClientConfig {
    pub fn new(base_url: Url, operator: &str) -> Self {
        Self {
            base_url,
            user_agent: format!("Recruitment feed, run by {}", operator),
            period_max: 45,
            timeout: Duration::from_secs(15),
        }
    }
}

pub struct NsClient {
    inner: reqwest::Client,
    base_url: Url,
    limiter: RateLimiter,
}

impl NsClient {
    pub fn new(config: NsClientConfig) -> Result<Self, RequestError> {
        let inner = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            inner,
            base_url: config.base_url,
            limiter: RateLimiter::new(config.period_max),
        })
    }

    /// The endpoint URL with `params` as its query string.
    pub fn shard_url(&self, params: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().clear().extend_pairs(params);
        url
    }

    /// # Request
    ///
    /// Issues one rate-limited GET.
    ///
    /// # Errors
    /// - [`RequestError::RateLimited`] if the quota is exhausted (nothing is
    ///   sent) or the server answered 429.
    /// - [`RequestError::Status`] for any other non-success status.
    /// - [`RequestError::Http`] for transport failures.
    pub async fn request(&self, url: Url) -> Result<ShardDocument, RequestError> {
        self.limiter.acquire()?;

        log::debug!("GET {}", url);
        let response = self.inner.get(url.clone()).send().await?;
        let status = response.status();
        self.limiter.observe(response.headers());

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = self.limiter.retry_after(response.headers());
            log::warn!("Upstream throttled us; retry in {}s", retry_after.as_secs());
            return Err(RequestError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(RequestError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(ShardDocument::new(response.text().await?))
    }

    /// Founding time of `nation`, or `None` if the nation does not exist.
    pub async fn nation_founded_at(&self, nation: &str) -> Result<Option<DateTime<Utc>>, RequestError> {
        let nation = canonicalize(nation);
        let url = self.shard_url(&[("nation", nation.as_str()), ("q", "foundedtime")]);

        let doc = match self.request(url).await {
            Ok(doc) => doc,
            Err(RequestError::Status { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(doc
            .shard("FOUNDEDTIME")
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0)))
    }

    /// The most recent foundings, oldest first.
    pub async fn new_nations(&self) -> Result<Vec<NewNation>, RequestError> {
        let url = self.shard_url(&[("q", "newnationdetails")]);
        let mut nations = self.request(url).await?.new_nations();
        // the shard lists newest first
        nations.reverse();
        Ok(nations)
    }

    pub fn rate_snapshot(&self) -> RateSnapshot {
        self.limiter.snapshot()
    }
}
