//! Shared helpers for the gateway integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{Request, Response},
    Router,
};
use mockito::ServerGuard;
use tower::ServiceExt;

use webtools_gateway::{router, AppState, Config};

pub const CLIENT_ADDR: ([u8; 4], u16) = ([203, 0, 113, 7], 51000);

/// Config pointing both adapters at the mock server.
pub fn test_config(server: &ServerGuard) -> Config {
    Config {
        search_endpoint: format!("{}/html/", server.url()),
        translate_endpoint: format!("{}/translate_a/single", server.url()),
        ..Config::default()
    }
}

pub fn app(config: Config) -> Router {
    router(AppState::from_config(config).expect("state builds from test config"))
}

/// Tag a request with a peer address the way the real listener does.
pub fn from_client(mut request: Request<Body>) -> Request<Body> {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(CLIENT_ADDR)));
    request
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.expect("router is infallible")
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).expect("json body")
}

pub fn json_post(uri: &str, payload: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("valid request")
}

/// A results page shaped like the HTML-only search frontend.
pub fn results_page(count: usize) -> String {
    let results: String = (1..=count)
        .map(|i| {
            format!(
                r#"<div class="result results_links web-result">
  <h2 class="result__title"><a class="result__a" href="https://example.com/{i}">Result {i}</a></h2>
  <a class="result__snippet" href="https://example.com/{i}">Snippet for result {i}</a>
</div>"#
            )
        })
        .collect();
    format!("<!DOCTYPE html><html><body><div id=\"links\">{results}</div></body></html>")
}
