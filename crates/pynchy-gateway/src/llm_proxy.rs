//! LLM reverse proxy (§4.6 "built-in mode"): one ephemeral-key-authenticated
//! endpoint containers call instead of the real provider, so the real
//! Anthropic/OpenAI credential never reaches a container.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::state::{AnthropicCredential, GatewayState};

const ANTHROPIC_BASE: &str = "https://api.anthropic.com";
const OPENAI_BASE: &str = "https://api.openai.com";

/// Headers stripped before forwarding upstream, and never copied back from
/// the upstream response (§4.6 step 3 "Strip hop-by-hop and auth headers").
const HOP_BY_HOP: &[&str] = &[
    "connection", "host", "authorization", "x-api-key", "content-length", "transfer-encoding",
];

pub async fn proxy(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let auth_header = headers.get("authorization").and_then(|v| v.to_str().ok());
    let api_key_header = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if !state.check_auth(auth_header, api_key_header) {
        return (StatusCode::UNAUTHORIZED, "invalid gateway key").into_response();
    }

    let path = uri.path();
    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();

    let (base, credential_header, credential_value) = if path.starts_with("/v1/messages") {
        match &state.anthropic_credential {
            Some(AnthropicCredential::ApiKey(key)) => (ANTHROPIC_BASE, "x-api-key", key.clone()),
            Some(AnthropicCredential::OauthToken(token)) => (ANTHROPIC_BASE, "authorization", format!("Bearer {token}")),
            None => return (StatusCode::BAD_GATEWAY, "no anthropic credential configured").into_response(),
        }
    } else if path.starts_with("/v1/") {
        match &state.openai_api_key {
            Some(key) => (OPENAI_BASE, "authorization", format!("Bearer {key}")),
            None => return (StatusCode::BAD_GATEWAY, "no openai credential configured").into_response(),
        }
    } else {
        return (StatusCode::NOT_FOUND, "no route for path").into_response();
    };

    let upstream_url = format!("{base}{path}{query}");

    let mut upstream_headers = reqwest::header::HeaderMap::new();
    for (name, value) in headers.iter() {
        if HOP_BY_HOP.contains(&name.as_str().to_lowercase().as_str()) {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            upstream_headers.insert(n, v);
        }
    }
    if let (Ok(name), Ok(value)) = (
        reqwest::header::HeaderName::from_bytes(credential_header.as_bytes()),
        reqwest::header::HeaderValue::from_str(&credential_value),
    ) {
        upstream_headers.insert(name, value);
    }

    let reqwest_method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => return (StatusCode::METHOD_NOT_ALLOWED, "unsupported method").into_response(),
    };

    let upstream = state
        .http
        .request(reqwest_method, &upstream_url)
        .headers(upstream_headers)
        .body(body)
        .send()
        .await;

    let upstream = match upstream {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(error = %e, upstream_url, "llm proxy upstream request failed");
            return (StatusCode::BAD_GATEWAY, format!("upstream error: {e}")).into_response();
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response_builder = Response::builder().status(status);
    for (name, value) in upstream.headers().iter() {
        if HOP_BY_HOP.contains(&name.as_str().to_lowercase().as_str()) {
            continue;
        }
        response_builder = response_builder.header(name.as_str(), value.as_bytes());
    }

    // Byte-for-byte streaming passthrough (§4.6 step 4) — no buffering.
    let stream = upstream.bytes_stream();
    response_builder.body(Body::from_stream(stream)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
