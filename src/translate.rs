//! Text translation through a sentence-fragment translation endpoint.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use crate::error::{GatewayError, Service, UpstreamFailure};
use crate::limits::HostLimiter;
use crate::upstream::{self, RetryConfig};

pub const AUTO_LANGUAGE: &str = "auto";
pub const DEFAULT_TARGET_LANGUAGE: &str = "ja";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub text: String,
    /// Language code or `auto`.
    pub source_language: String,
    pub target_language: String,
}

/// Translated text plus the language codes exactly as requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub text: String,
    pub source_language: String,
    pub target_language: String,
}

#[derive(Debug, Clone)]
pub struct Translator {
    http: Client,
    endpoint: String,
    host: String,
    timeout: Duration,
    retry: RetryConfig,
    limiter: Option<Arc<HostLimiter>>,
}

impl Translator {
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

    pub fn build_url(&self, request: &TranslationRequest) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}client=gtx&sl={}&tl={}&dt=t&q={}",
            self.endpoint,
            separator,
            urlencoding::encode(&request.source_language),
            urlencoding::encode(&request.target_language),
            urlencoding::encode(&request.text),
        )
    }

    #[instrument(
        skip(self, request),
        fields(from = %request.source_language, to = %request.target_language, chars = request.text.chars().count())
    )]
    pub async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationResult, GatewayError> {
        if request.text.trim().is_empty() {
            return Err(GatewayError::MissingParameter("text"));
        }

        let url = self.build_url(request);
        let payload = upstream::retry(&self.retry, || self.fetch(&url))
            .await
            .map_err(|failure| GatewayError::upstream(Service::Translate, failure))?;

        let text = join_sentences(&payload);
        debug!(translated_chars = text.chars().count(), "translation completed");

        Ok(TranslationResult {
            text,
            source_language: request.source_language.clone(),
            target_language: request.target_language.clone(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Value, UpstreamFailure> {
        let _permit = match &self.limiter {
            Some(limiter) => Some(limiter.acquire_within(&self.host, self.timeout).await?),
            None => None,
        };

        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .header(header::USER_AGENT, upstream::DEFAULT_USER_AGENT)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "translation upstream request failed");
                UpstreamFailure::from_reqwest(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "translation upstream returned an error status");
            return Err(UpstreamFailure::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| {
            warn!(error = %e, "failed to read translation response");
            UpstreamFailure::from_reqwest(&e)
        })?;

        serde_json::from_str(&body).map_err(|e| {
            warn!(error = %e, body_len = body.len(), "translation response is not JSON");
            UpstreamFailure::Decode
        })
    }
}

/// Concatenate the translated fragment of each sentence.
///
/// The payload looks like `[[["こんにちは","hello",null,null,1], ...], ...]`:
/// the first top-level array holds one entry per sentence, and each entry's
/// first element is the translated text. Anything that does not fit that shape
/// contributes nothing.
pub fn join_sentences(payload: &Value) -> String {
    let Some(sentences) = payload.get(0).and_then(Value::as_array) else {
        return String::new();
    };

    sentences
        .iter()
        .filter_map(|sentence| sentence.get(0).and_then(Value::as_str))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(text: &str, from: &str, to: &str) -> TranslationRequest {
        TranslationRequest {
            text: text.to_string(),
            source_language: from.to_string(),
            target_language: to.to_string(),
        }
    }

    #[test]
    fn joins_sentence_fragments_in_order() {
        let payload = json!([
            [
                ["Hello. ", "こんにちは。", null, null, 10],
                ["How are you?", "お元気ですか？", null, null, 10]
            ],
            null,
            "ja"
        ]);
        assert_eq!(join_sentences(&payload), "Hello. How are you?");
    }

    #[test]
    fn single_sentence() {
        let payload = json!([[["こんにちは", "hello", null, null, 1]]]);
        assert_eq!(join_sentences(&payload), "こんにちは");
    }

    #[test]
    fn unexpected_shapes_yield_empty_text() {
        assert_eq!(join_sentences(&json!({})), "");
        assert_eq!(join_sentences(&json!([])), "");
        assert_eq!(join_sentences(&json!([null])), "");
        assert_eq!(join_sentences(&json!([[[null, "x"]]])), "");
    }

    #[test]
    fn skips_non_text_entries() {
        let payload = json!([[["a"], [1, 2], null, ["b"]]]);
        assert_eq!(join_sentences(&payload), "ab");
    }

    #[test]
    fn builds_url_with_encoded_text() {
        let translator = Translator::new(
            Client::new(),
            "https://translate.googleapis.com/translate_a/single",
            Duration::from_secs(5),
        );
        assert_eq!(
            translator.build_url(&request("hello world?", "auto", "zh-tw")),
            "https://translate.googleapis.com/translate_a/single?client=gtx&sl=auto&tl=zh-tw&dt=t&q=hello%20world%3F"
        );
    }

    #[tokio::test]
    async fn blank_text_is_rejected_before_fetching() {
        let translator = Translator::new(Client::new(), "http://localhost/", Duration::from_secs(1));
        let err = translator.translate(&request("  ", "en", "ja")).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingParameter("text")));
    }

    #[tokio::test]
    async fn shares_the_per_host_cap() {
        let server = mockito::Server::new_async().await;
        let limiter = Arc::new(HostLimiter::new(1));
        let _busy = limiter.acquire("127.0.0.1").await.unwrap();

        let translator = Translator::new(
            Client::new(),
            format!("{}/translate_a/single", server.url()),
            Duration::from_millis(100),
        )
        .with_host_limiter(limiter.clone());

        let err = translator
            .translate(&request("hello", "en", "ja"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::UpstreamFetch {
                service: Service::Translate,
                failure: UpstreamFailure::Timeout,
            }
        ));
    }
}
