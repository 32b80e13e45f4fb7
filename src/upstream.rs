//! Shared outbound HTTP plumbing: the client, browser signatures and retry.

use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use rand::{seq::SliceRandom, Rng};
use reqwest::{redirect, Client};
use tracing::warn;

use crate::config::Config;
use crate::error::UpstreamFailure;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        DEFAULT_USER_AGENT,
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/123.0.0.0 Safari/537.36",
    ]
});

/// Pick a desktop browser User-Agent.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(DEFAULT_USER_AGENT)
}

/// Build the client used by the search and translation adapters.
///
/// Certificate verification stays on. No total request timeout is set here;
/// callers bound their own requests.
pub fn build_client(config: &Config) -> anyhow::Result<Client> {
    client_with_policy(config, redirect::Policy::limited(config.max_redirects))
}

/// Build the client used by the forwarding proxy.
///
/// With destination blocking on, redirects are not followed: a hop could land
/// on an address that was never checked. The proxy returns them to the
/// browser instead.
pub fn build_proxy_client(config: &Config) -> anyhow::Result<Client> {
    let policy = if config.block_private_destinations {
        redirect::Policy::none()
    } else {
        redirect::Policy::limited(config.max_redirects)
    };
    client_with_policy(config, policy)
}

/// Host part of a configured endpoint, used to key per-host limits.
pub fn endpoint_host(endpoint: &str) -> String {
    url::Url::parse(endpoint)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default()
}

fn client_with_policy(config: &Config, policy: redirect::Policy) -> anyhow::Result<Client> {
    let client = Client::builder()
        .redirect(policy)
        .connect_timeout(config.connect_timeout)
        .pool_max_idle_per_host(config.max_connections_per_host)
        .build()?;
    Ok(client)
}

// ============================================================================
// Retry
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first; `1` disables retrying.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Exponential backoff for the given (1-based) failed attempt, jittered
    /// into the upper half of the window.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        let ceiling = exp.as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(ceiling / 2..=ceiling);
        Duration::from_millis(jittered)
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
pub async fn retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, UpstreamFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamFailure>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(failure) if attempt < max_attempts && failure.is_retryable() => {
                let delay = config.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    %failure,
                    delay_ms = delay.as_millis() as u64,
                    "upstream attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(failure) => return Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn user_agent_comes_from_pool() {
        let ua = random_user_agent();
        assert!(ua.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn endpoint_host_is_lowercased() {
        assert_eq!(endpoint_host("https://HTML.DuckDuckGo.com/html/"), "html.duckduckgo.com");
        assert_eq!(endpoint_host("http://127.0.0.1:4000/x"), "127.0.0.1");
        assert_eq!(endpoint_host("not a url"), "");
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        let first = config.delay_for(1);
        assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));
        let third = config.delay_for(3);
        assert!(third >= Duration::from_millis(150) && third <= Duration::from_millis(300));
        assert!(config.delay_for(30) <= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn single_attempt_does_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(UpstreamFailure::Timeout) }
        })
        .await;
        assert_eq!(result, Err(UpstreamFailure::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(UpstreamFailure::Status(503))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_stop_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(UpstreamFailure::Status(404)) }
        })
        .await;
        assert_eq!(result, Err(UpstreamFailure::Status(404)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    async fn redirecting_server() -> mockito::ServerGuard {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/start")
            .with_status(302)
            .with_header("location", "/landing")
            .create_async()
            .await;
        server
            .mock("GET", "/landing")
            .with_status(200)
            .with_body("landed")
            .create_async()
            .await;
        server
    }

    #[tokio::test]
    async fn proxy_client_stops_at_redirects_when_blocking() {
        let server = redirecting_server().await;
        let config = Config {
            block_private_destinations: true,
            ..Config::default()
        };

        let client = build_proxy_client(&config).unwrap();
        let response = client.get(format!("{}/start", server.url())).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::FOUND);
        assert_eq!(response.headers()["location"], "/landing");
    }

    #[tokio::test]
    async fn clients_follow_redirects_otherwise() {
        let server = redirecting_server().await;
        let config = Config::default();

        for client in [build_client(&config).unwrap(), build_proxy_client(&config).unwrap()] {
            let response = client.get(format!("{}/start", server.url())).send().await.unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::OK);
        }

        // Adapter endpoints are configured, not client-supplied.
        let blocking = Config {
            block_private_destinations: true,
            ..Config::default()
        };
        let response = build_client(&blocking)
            .unwrap()
            .get(format!("{}/start", server.url()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }
}
