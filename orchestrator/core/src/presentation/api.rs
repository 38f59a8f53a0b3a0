// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface.
//!
//! | Route | Method | Limiter |
//! |-------|--------|---------|
//! | `/health` | GET | none |
//! | `/api/analyze` | POST | primary |
//! | `/api/circuit-breakers` | GET | none |
//! | `/api/circuit-breakers/reset` | POST | strict |
//!
//! Callers are identified for rate limiting by the `X-API-Key` header or a
//! bearer token when present, else by client address and user agent.

use axum::{
    extract::{ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::application::analysis::AnalysisService;
use crate::application::orchestrator::{OrchestratorError, ProviderRequest};
use crate::domain::circuit_breaker::CircuitBreakerRegistry;
use crate::domain::credential::RateLimitKey;
use crate::domain::rate_limiter::{Admission, RateLimiter};

pub struct AppState {
    pub analysis: Arc<dyn AnalysisService>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    /// Edge limiter for ordinary endpoints
    pub limiter: Arc<RateLimiter>,
    /// Edge limiter for administrative endpoints
    pub strict_limiter: Arc<RateLimiter>,
    /// Providers consulted when a request names none, with server-side keys
    pub default_providers: Vec<ProviderRequest>,
    pub default_timeout: Duration,
    pub start_time: Instant,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/circuit-breakers", get(list_breakers_handler))
        .route("/api/circuit-breakers/reset", post(reset_breakers_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub text: String,
    #[serde(default)]
    pub providers: Vec<ProviderRequest>,
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Rate limit exceeded. Retry after {0} seconds")]
    RateLimited(u64),

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal error")]
    Internal,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after) = match &self {
            ApiError::RateLimited(secs) => (StatusCode::TOO_MANY_REQUESTS, Some(*secs)),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = ErrorBody {
            error: self.to_string(),
            retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::InvalidTimeout => ApiError::BadRequest(err.to_string()),
            OrchestratorError::Chunking(e) => {
                warn!(error = %e, "Analysis failed while chunking input");
                ApiError::Internal
            }
            OrchestratorError::Analysis(e) => {
                warn!(error = %e, "Consensus analysis task failed");
                ApiError::Internal
            }
        }
    }
}

/// Rate-limit identifier of the caller
pub struct CallerId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CallerId(caller_id(&parts.headers, parts.extensions.get::<ConnectInfo<SocketAddr>>())))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn caller_id(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    let api_key = header_str(headers, "x-api-key").or_else(|| {
        header_str(headers, header::AUTHORIZATION.as_str()).and_then(|v| v.strip_prefix("Bearer "))
    });
    if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
        return RateLimitKey::for_api_key(key);
    }

    let ip = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = header_str(headers, header::USER_AGENT.as_str()).unwrap_or("");

    RateLimitKey::for_client(&ip, user_agent)
}

fn admit(limiter: &RateLimiter, caller: &CallerId) -> Result<(), ApiError> {
    match limiter.admit(&caller.0) {
        Admission::Allowed => Ok(()),
        Admission::Denied { retry_after_secs, .. } => Err(ApiError::RateLimited(retry_after_secs)),
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let providers: Vec<&str> = state
        .default_providers
        .iter()
        .map(|p| p.provider.as_str())
        .collect();

    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "providers": providers,
    }))
}

async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Response, ApiError> {
    admit(&state.limiter, &caller)?;

    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }

    let timeout = match request.timeout_secs {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map_err(|_| ApiError::BadRequest("timeout_secs must be a positive number".to_string()))?,
        None => state.default_timeout,
    };

    let providers = resolve_providers(request.providers, &state.default_providers);
    debug!(providers = providers.len(), timeout_ms = timeout.as_millis() as u64, "Analyze request");

    let outcome = state.analysis.analyze(&request.text, &providers, timeout).await?;
    Ok(Json(outcome).into_response())
}

/// Requested providers, with server-side keys filling in missing ones.
/// An empty request list means every default provider.
fn resolve_providers(requested: Vec<ProviderRequest>, defaults: &[ProviderRequest]) -> Vec<ProviderRequest> {
    if requested.is_empty() {
        return defaults.to_vec();
    }

    requested
        .into_iter()
        .map(|mut request| {
            if request.api_key().is_none() {
                request.api_key = defaults
                    .iter()
                    .find(|d| d.provider == request.provider)
                    .and_then(|d| d.api_key.clone());
            }
            request
        })
        .collect()
}

async fn list_breakers_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "breakers": state.breakers.snapshots() }))
}

async fn reset_breakers_handler(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
) -> Result<Json<serde_json::Value>, ApiError> {
    admit(&state.strict_limiter, &caller)?;

    let cleared = state.breakers.len();
    state.breakers.reset();
    Ok(Json(json!({ "cleared": cleared })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::ProviderName;

    #[test]
    fn test_caller_prefers_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-caller"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        assert_eq!(caller_id(&headers, None), RateLimitKey::for_api_key("sk-caller"));

        let mut bearer = HeaderMap::new();
        bearer.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer sk-caller"));
        assert_eq!(caller_id(&bearer, None), RateLimitKey::for_api_key("sk-caller"));
    }

    #[test]
    fn test_caller_falls_back_to_client() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.1.2.3, 172.16.0.1"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        assert_eq!(caller_id(&headers, None), RateLimitKey::for_client("10.1.2.3", "curl/8"));

        let addr: SocketAddr = "192.168.0.9:5555".parse().unwrap();
        assert_eq!(
            caller_id(&HeaderMap::new(), Some(&ConnectInfo(addr))),
            RateLimitKey::for_client("192.168.0.9", "")
        );
    }

    #[test]
    fn test_resolve_providers_fills_server_keys() {
        let defaults = vec![
            ProviderRequest::new(ProviderName::OpenAI).with_api_key("server-openai"),
            ProviderRequest::new(ProviderName::Claude).with_api_key("server-claude"),
        ];

        let all = resolve_providers(Vec::new(), &defaults);
        assert_eq!(all, defaults);

        let requested = vec![
            ProviderRequest::new(ProviderName::Claude),
            ProviderRequest::new(ProviderName::OpenAI).with_api_key("caller-openai"),
            ProviderRequest::new(ProviderName::Grok),
        ];
        let resolved = resolve_providers(requested, &defaults);
        assert_eq!(resolved[0].api_key(), Some("server-claude"));
        assert_eq!(resolved[1].api_key(), Some("caller-openai"));
        assert_eq!(resolved[2].api_key(), None);
    }

    #[test]
    fn test_rate_limited_response_has_retry_after() {
        let response = ApiError::RateLimited(42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
