use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
pub const DEFAULT_TRANSLATE_ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

/// Runtime settings, read once at startup from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Deadline for an upstream to answer (headers for the proxy, the whole
    /// body for search and translation).
    pub upstream_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_connections_per_host: usize,
    pub max_redirects: usize,
    pub search_endpoint: String,
    pub translate_endpoint: String,
    pub max_results_ceiling: usize,
    /// Requests per client IP per minute on `/proxy` and `/search`; 0 disables.
    pub rate_limit_per_minute: u32,
    pub upstream_retry_attempts: u32,
    pub block_private_destinations: bool,
    pub static_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 3000,
            upstream_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
            max_connections_per_host: 8,
            max_redirects: 10,
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            translate_endpoint: DEFAULT_TRANSLATE_ENDPOINT.to_string(),
            max_results_ceiling: 25,
            rate_limit_per_minute: 120,
            upstream_retry_attempts: 1,
            block_private_destinations: false,
            static_dir: PathBuf::from("static"),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            host: parse_or(&lookup, "HOST", defaults.host)?,
            port: parse_or(&lookup, "PORT", defaults.port)?,
            upstream_timeout: Duration::from_secs(parse_or(
                &lookup,
                "UPSTREAM_TIMEOUT_SECS",
                defaults.upstream_timeout.as_secs(),
            )?),
            connect_timeout: Duration::from_secs(parse_or(
                &lookup,
                "CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )?),
            max_connections_per_host: parse_or(
                &lookup,
                "MAX_CONNECTIONS_PER_HOST",
                defaults.max_connections_per_host,
            )?,
            max_redirects: parse_or(&lookup, "MAX_REDIRECTS", defaults.max_redirects)?,
            search_endpoint: lookup("SEARCH_ENDPOINT").unwrap_or(defaults.search_endpoint),
            translate_endpoint: lookup("TRANSLATE_ENDPOINT")
                .unwrap_or(defaults.translate_endpoint),
            max_results_ceiling: parse_or(
                &lookup,
                "MAX_RESULTS_CEILING",
                defaults.max_results_ceiling,
            )?,
            rate_limit_per_minute: parse_or(
                &lookup,
                "RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            )?,
            upstream_retry_attempts: parse_or(
                &lookup,
                "UPSTREAM_RETRY_ATTEMPTS",
                defaults.upstream_retry_attempts,
            )?,
            block_private_destinations: parse_or(
                &lookup,
                "BLOCK_PRIVATE_DESTINATIONS",
                defaults.block_private_destinations,
            )?,
            static_dir: lookup("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstream_timeout.is_zero() {
            return Err(anyhow!("UPSTREAM_TIMEOUT_SECS must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("CONNECT_TIMEOUT_SECS must be greater than zero"));
        }
        if self.max_connections_per_host == 0 {
            return Err(anyhow!("MAX_CONNECTIONS_PER_HOST must be at least 1"));
        }
        if self.max_results_ceiling == 0 {
            return Err(anyhow!("MAX_RESULTS_CEILING must be at least 1"));
        }
        if self.upstream_retry_attempts == 0 {
            return Err(anyhow!("UPSTREAM_RETRY_ATTEMPTS must be at least 1"));
        }
        for (key, endpoint) in [
            ("SEARCH_ENDPOINT", &self.search_endpoint),
            ("TRANSLATE_ENDPOINT", &self.translate_endpoint),
        ] {
            crate::validator::validate(endpoint)
                .map_err(|e| anyhow!("{key} is not a usable URL: {e}"))?;
        }
        Ok(())
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value `{raw}`")),
        _ => Ok(default),
    }
}
