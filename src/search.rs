//! Web search by fetching a results page and scraping it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use crate::error::{GatewayError, Service, UpstreamFailure};
use crate::limits::HostLimiter;
use crate::extractor::{self, SearchResult};
use crate::upstream::{self, RetryConfig};

pub const DEFAULT_MAX_RESULTS: usize = 10;
pub const DEFAULT_REGION: &str = "jp-jp";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SafeSearch {
    Off,
    #[default]
    Moderate,
    Strict,
}

impl SafeSearch {
    fn as_param(self) -> &'static str {
        match self {
            SafeSearch::Strict => "1",
            SafeSearch::Moderate => "-1",
            SafeSearch::Off => "-2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: usize,
    pub region: String,
    pub safesearch: SafeSearch,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: DEFAULT_MAX_RESULTS,
            region: DEFAULT_REGION.to_string(),
            safesearch: SafeSearch::default(),
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_safesearch(mut self, safesearch: SafeSearch) -> Self {
        self.safesearch = safesearch;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SearchClient {
    http: Client,
    endpoint: String,
    host: String,
    timeout: Duration,
    retry: RetryConfig,
    limiter: Option<Arc<HostLimiter>>,
}

impl SearchClient {
    pub fn new(http: Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        let endpoint = endpoint.into();
        Self {
            http,
            host: upstream::endpoint_host(&endpoint),
            endpoint,
            timeout,
            retry: RetryConfig::default(),
            limiter: None,
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Share the per-host connection cap with the other upstream callers.
    /// Waiting for a slot counts against the request timeout.
    pub fn with_host_limiter(mut self, limiter: Arc<HostLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn build_url(&self, query: &SearchQuery) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}q={}&kl={}&kp={}",
            self.endpoint,
            separator,
            urlencoding::encode(query.query.trim()),
            urlencoding::encode(&query.region),
            query.safesearch.as_param(),
        )
    }

    #[instrument(skip(self, query), fields(query = %query.query, max_results = query.max_results))]
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, GatewayError> {
        if query.query.trim().is_empty() {
            return Err(GatewayError::MissingParameter("query"));
        }

        let url = self.build_url(query);
        let html = upstream::retry(&self.retry, || self.fetch(&url, &query.region))
            .await
            .map_err(|failure| GatewayError::upstream(Service::Search, failure))?;

        let results = extractor::extract(&html, query.max_results);
        debug!(count = results.len(), html_len = html.len(), "search completed");
        Ok(results)
    }

    async fn fetch(&self, url: &str, region: &str) -> Result<String, UpstreamFailure> {
        let _permit = match &self.limiter {
            Some(limiter) => Some(limiter.acquire_within(&self.host, self.timeout).await?),
            None => None,
        };

        debug!(url = %url, "fetching search results page");

        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .header(header::USER_AGENT, upstream::random_user_agent())
            .header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(header::ACCEPT_LANGUAGE, accept_language(region))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "search upstream request failed");
                UpstreamFailure::from_reqwest(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "search upstream returned an error status");
            return Err(UpstreamFailure::Status(status.as_u16()));
        }

        response.text().await.map_err(|e| {
            warn!(error = %e, "failed to read search results page");
            UpstreamFailure::from_reqwest(&e)
        })
    }
}

/// `Accept-Language` matching a `country-language` region tag such as `jp-jp`
/// or `us-en`. The world-wide region (`wt-wt`) and unknown shapes get English.
pub fn accept_language(region: &str) -> String {
    let Some((country, language)) = region.split_once('-') else {
        return "en-US,en;q=0.9".to_string();
    };
    if country.eq_ignore_ascii_case("wt") || country.is_empty() || language.is_empty() {
        return "en-US,en;q=0.9".to_string();
    }

    let language = match language.to_ascii_lowercase().as_str() {
        "jp" => "ja".to_string(),
        "kr" => "ko".to_string(),
        other => other.to_string(),
    };
    if language == "en" {
        return format!("en-{},en;q=0.9", country.to_ascii_uppercase());
    }
    format!(
        "{language}-{},{language};q=0.9,en;q=0.8",
        country.to_ascii_uppercase()
    )
}
