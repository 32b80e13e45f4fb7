//! Forwarding proxy that makes arbitrary pages embeddable.
//!
//! Requests are relayed to the target as-is and responses stream back
//! untouched except for their headers (see [`headers`]).

pub mod destination;
pub mod headers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, Method},
    response::Response,
};
use futures_util::TryStreamExt;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Service, UpstreamFailure};
use crate::limits::HostLimiter;
use crate::validator::ValidUrl;

pub use headers::{
    forward_request_headers, proxied_location, rewrite_response_headers, HostOverride,
};

/// A client request bound for `target`.
#[derive(Debug)]
pub struct ProxyRequest {
    pub target: ValidUrl,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Body,
    pub client_addr: Option<SocketAddr>,
}

#[derive(Debug)]
pub struct ForwardingProxy {
    http: Client,
    limiter: Arc<HostLimiter>,
    timeout: Duration,
    block_private: bool,
}

impl ForwardingProxy {
    pub fn new(http: Client, limiter: Arc<HostLimiter>, timeout: Duration) -> Self {
        Self {
            http,
            limiter,
            timeout,
            block_private: false,
        }
    }

    /// Refuse targets that resolve to loopback, private or link-local space.
    ///
    /// The client handed to [`ForwardingProxy::new`] must not follow redirects
    /// when this is on (see `upstream::build_proxy_client`). Redirects are
    /// instead returned to the browser with `Location` pointing back at the
    /// proxy, so every hop is checked again.
    pub fn block_private_destinations(mut self, block: bool) -> Self {
        self.block_private = block;
        self
    }

    /// Relay `request` and stream the upstream response back.
    ///
    /// Errors are only returned before any response bytes exist. A failure
    /// while the body is streaming ends the stream with an error, which aborts
    /// the client connection.
    pub async fn forward(&self, request: ProxyRequest) -> Result<Response, GatewayError> {
        let ProxyRequest {
            target,
            method,
            headers: client_headers,
            body,
            client_addr,
        } = request;

        if self.block_private {
            destination::ensure_public(&target).await?;
        }

        let host = target.host().to_string();
        let outbound_headers = forward_request_headers(&client_headers, client_addr.map(|a| a.ip()));

        let mut outbound = self
            .http
            .request(method.clone(), target.as_url().clone())
            .headers(outbound_headers);
        if has_body(&client_headers) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        debug!(%method, target = %target, "forwarding request");

        let exchange = async {
            let permit = self.limiter.acquire(&host).await.map_err(|_| UpstreamFailure::Other)?;
            let response = outbound.send().await.map_err(|e| {
                warn!(target = %target, error = %e, "upstream request failed");
                UpstreamFailure::from_reqwest(&e)
            })?;
            Ok::<_, UpstreamFailure>((permit, response))
        };

        let (permit, upstream) = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(failure)) => return Err(GatewayError::upstream(Service::Proxy, failure)),
            Err(_) => {
                warn!(target = %target, timeout_secs = self.timeout.as_secs(), "upstream request timed out");
                return Err(GatewayError::upstream(Service::Proxy, UpstreamFailure::Timeout));
            }
        };

        let status = upstream.status();
        // Overrides key on where the content came from, after redirects.
        let origin_host = upstream.url().host_str().unwrap_or(&host).to_string();
        let mut response_headers = rewrite_response_headers(&origin_host, upstream.headers());

        if self.block_private && status.is_redirection() {
            if let Some(location) = upstream
                .headers()
                .get(header::LOCATION)
                .and_then(|location| proxied_location(upstream.url(), location))
            {
                debug!(target = %target, "redirect routed back through the proxy");
                response_headers.insert(header::LOCATION, location);
            }
        }

        info!(
            %method,
            target = %target,
            status = status.as_u16(),
            content_type = ?response_headers.get(header::CONTENT_TYPE),
            "relaying upstream response"
        );

        let stream_target = target.to_string();
        let stream = upstream
            .bytes_stream()
            .inspect_err(move |e| {
                warn!(target = %stream_target, error = %e, "upstream body failed mid-stream, aborting");
            })
            .map_ok(move |chunk| {
                // The slot stays taken until the body is done or dropped.
                let _held = &permit;
                chunk
            });

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Whether the client request carries a body worth streaming upstream.
fn has_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .is_some_and(|len| len > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn detects_request_bodies() {
        let mut headers = HeaderMap::new();
        assert!(!has_body(&headers));

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(!has_body(&headers));

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        assert!(has_body(&headers));

        let mut chunked = HeaderMap::new();
        chunked.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert!(has_body(&chunked));
    }
}
