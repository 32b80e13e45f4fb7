use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Query, Request, State,
    },
    middleware,
    response::Response,
    routing::{any, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, info_span};
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ErrorBody, GatewayError};
use crate::extractor::SearchResult;
use crate::limits::HostLimiter;
use crate::proxy::{ForwardingProxy, ProxyRequest};
use crate::rate_limit::{self, RateLimiter};
use crate::search::{SafeSearch, SearchClient, SearchQuery, DEFAULT_MAX_RESULTS, DEFAULT_REGION};
use crate::translate::{
    TranslationRequest, TranslationResult, Translator, AUTO_LANGUAGE, DEFAULT_TARGET_LANGUAGE,
};
use crate::upstream::{self, RetryConfig};
use crate::validator;

pub struct AppState {
    pub config: Config,
    pub proxy: ForwardingProxy,
    pub search: SearchClient,
    pub translator: Translator,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn from_config(config: Config) -> anyhow::Result<Arc<Self>> {
        let http = upstream::build_client(&config)?;
        let proxy_http = upstream::build_proxy_client(&config)?;
        let retry = RetryConfig::with_attempts(config.upstream_retry_attempts);
        let hosts = Arc::new(HostLimiter::new(config.max_connections_per_host));

        let proxy = ForwardingProxy::new(proxy_http, hosts.clone(), config.upstream_timeout)
            .block_private_destinations(config.block_private_destinations);
        let search = SearchClient::new(http.clone(), &config.search_endpoint, config.upstream_timeout)
            .with_retry_config(retry.clone())
            .with_host_limiter(hosts.clone());
        let translator = Translator::new(http, &config.translate_endpoint, config.upstream_timeout)
            .with_retry_config(retry)
            .with_host_limiter(hosts);
        let limiter = Arc::new(RateLimiter::per_minute(config.rate_limit_per_minute));

        Ok(Arc::new(Self {
            config,
            proxy,
            search,
            translator,
            limiter,
        }))
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProxyParams {
    /// Absolute http(s) URL to fetch.
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    pub query: Option<String>,
    /// Defaults to 10; clamped to the configured ceiling.
    pub max_results: Option<usize>,
    /// Region tag such as `jp-jp` or `us-en`.
    pub region: Option<String>,
    pub safesearch: Option<SafeSearch>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TranslateRequest {
    pub text: Option<String>,
    /// Source language code, `auto` by default.
    pub from: Option<String>,
    /// Target language code, `ja` by default.
    pub to: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub services: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceStatus {
    pub proxy: String,
    pub search: String,
    pub translate: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Relay any request to `url` with embedding-friendly response headers.
#[utoipa::path(
    get,
    path = "/proxy",
    tag = "proxy",
    params(ProxyParams),
    responses(
        (status = 200, description = "Upstream response, streamed with rewritten headers"),
        (status = 400, description = "Missing or invalid url", body = ErrorBody),
        (status = 429, description = "Rate limit exceeded", body = ErrorBody),
        (status = 500, description = "Upstream unreachable or timed out", body = ErrorBody)
    )
)]
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    params: Result<Query<ProxyParams>, QueryRejection>,
    request: Request,
) -> Result<Response, GatewayError> {
    let Query(params) = params.map_err(|e| {
        debug!(error = %e.body_text(), "unusable proxy query string");
        GatewayError::InvalidUrl("pass exactly one `url` query parameter".to_string())
    })?;
    let raw = params
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or(GatewayError::MissingTarget)?;
    let target = validator::validate(&raw)?;

    let (parts, body) = request.into_parts();
    state
        .proxy
        .forward(ProxyRequest {
            target,
            method: parts.method,
            headers: parts.headers,
            body,
            client_addr: connect_info.map(|ConnectInfo(addr)| addr),
        })
        .await
}

/// Search the web and return parsed results.
#[utoipa::path(
    post,
    path = "/search",
    tag = "search",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Results in page order", body = [SearchResult]),
        (status = 400, description = "Missing query", body = ErrorBody),
        (status = 429, description = "Rate limit exceeded", body = ErrorBody),
        (status = 500, description = "Search upstream failed", body = ErrorBody)
    )
)]
pub async fn search(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Vec<SearchResult>>, GatewayError> {
    let Json(payload) = payload.map_err(|e| GatewayError::InvalidBody(e.body_text()))?;

    let query = payload
        .query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or(GatewayError::MissingParameter("query"))?;

    let max_results = match payload.max_results {
        None | Some(0) => DEFAULT_MAX_RESULTS,
        Some(n) => n,
    }
    .min(state.config.max_results_ceiling);

    let region = payload
        .region
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string());

    let query = SearchQuery::new(query)
        .with_max_results(max_results)
        .with_region(region)
        .with_safesearch(payload.safesearch.unwrap_or_default());

    let results = state.search.search(&query).await?;
    Ok(Json(results))
}

/// Translate text between languages.
#[utoipa::path(
    post,
    path = "/translate",
    tag = "translate",
    request_body = TranslateRequest,
    responses(
        (status = 200, description = "Translated text", body = TranslationResult),
        (status = 400, description = "Missing text", body = ErrorBody),
        (status = 500, description = "Translation upstream failed", body = ErrorBody)
    )
)]
pub async fn translate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
) -> Result<Json<TranslationResult>, GatewayError> {
    let Json(payload) = payload.map_err(|e| GatewayError::InvalidBody(e.body_text()))?;

    let text = payload
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or(GatewayError::MissingParameter("text"))?;

    let language = |code: Option<String>, default: &str| {
        code.map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| default.to_string())
    };

    let request = TranslationRequest {
        text,
        source_language: language(payload.from, AUTO_LANGUAGE),
        target_language: language(payload.to, DEFAULT_TARGET_LANGUAGE),
    };

    let result = state.translator.translate(&request).await?;
    Ok(Json(result))
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    let running = || "running".to_string();
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        services: ServiceStatus {
            proxy: running(),
            search: running(),
            translate: running(),
        },
    })
}

// ============================================================================
// Router
// ============================================================================

#[derive(OpenApi)]
#[openapi(
    paths(proxy, search, translate, health),
    components(schemas(
        SearchRequest,
        SearchResult,
        SafeSearch,
        TranslateRequest,
        TranslationResult,
        HealthResponse,
        ServiceStatus,
        ErrorBody
    )),
    tags(
        (name = "proxy", description = "Embeddable forwarding proxy"),
        (name = "search", description = "Scraped web search"),
        (name = "translate", description = "Text translation"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;

/// Routes served both at the root and under `/api`.
fn api_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let rate_limited = middleware::from_fn_with_state(state.limiter.clone(), rate_limit::limit_by_client);

    // The proxy writes its own CORS headers; wrapping it would overwrite them.
    let proxy_routes = Router::new()
        .route("/proxy", any(proxy))
        .route_layer(rate_limited.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let json_routes = Router::new()
        .route("/search", post(search).layer(rate_limited))
        .route("/translate", post(translate))
        .route("/health", get(health))
        .layer(cors);

    proxy_routes.merge(json_routes)
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = api_routes(&state);

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback_service(ServeDir::new(&state.config.static_dir))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            info_span!(
                "request",
                request_id = %Uuid::new_v4(),
                method = %request.method(),
                uri = %request.uri(),
            )
        }))
        .with_state(state)
}
