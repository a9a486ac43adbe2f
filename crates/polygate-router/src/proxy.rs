use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use polygate_common::{ApiFamily, GatewayError, Posture};
use polygate_core::ratelimit::GLOBAL_SCOPE;
use polygate_core::upstream::UpstreamBody;
use polygate_core::{Gateway, RateLimiter, extract_bearer};
use polygate_storage::UsageRow;
use polygate_translate::{
    Endpoint, StreamTransformer, generate_chat_id, normalize_response, prepare_upstream_request,
};

use crate::error::{ApiError, REQUEST_ID_HEADER};

pub(crate) async fn chat_completions(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(gateway, Endpoint::ChatCompletions, headers, body).await
}

pub(crate) async fn completions(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(gateway, Endpoint::Completions, headers, body).await
}

pub(crate) async fn embeddings(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(gateway, Endpoint::Embeddings, headers, body).await
}

async fn proxy(
    gateway: Arc<Gateway>,
    endpoint: Endpoint,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let posture = gateway.config.posture;
    match handle_proxy(gateway, endpoint, headers, body, &request_id).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
    .tap_request_id(&request_id, posture)
}

trait TapRequestId {
    fn tap_request_id(self, request_id: &str, posture: Posture) -> Response;
}

impl TapRequestId for Response {
    fn tap_request_id(mut self, request_id: &str, _posture: Posture) -> Response {
        if !self.headers().contains_key(REQUEST_ID_HEADER)
            && let Ok(value) = HeaderValue::from_str(request_id)
        {
            self.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        self
    }
}

async fn handle_proxy(
    gateway: Arc<Gateway>,
    endpoint: Endpoint,
    headers: HeaderMap,
    body: Bytes,
    request_id: &str,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let posture = gateway.config.posture;
    let fail = |inner: GatewayError| ApiError::new(inner, request_id, posture);

    // 1. Caller authentication.
    let raw_key = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer)
        .ok_or_else(|| fail(GatewayError::invalid_api_key("missing bearer api key")))?;
    let api_key = gateway
        .authenticator
        .validate(&raw_key)
        .await
        .ok_or_else(|| fail(GatewayError::invalid_api_key("unknown or inactive api key")))?;

    // 2. Rate limits: global ceiling first, then the per-key budget.
    let window = gateway.rate_window();
    let global = gateway
        .limiter
        .check(GLOBAL_SCOPE, gateway.config.global_rate_limit_max, window);
    if !global.allowed {
        return Err(rate_limit_error(fail, &global));
    }
    let per_key_max = if api_key.rate_limit > 0 {
        api_key.rate_limit as u32
    } else {
        gateway.config.rate_limit_max_requests
    };
    let per_key = gateway
        .limiter
        .check(&RateLimiter::key_scope(api_key.id), per_key_max, window);
    if !per_key.allowed {
        return Err(rate_limit_error(fail, &per_key));
    }

    // 3. Body parsing and model requirement.
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| fail(GatewayError::bad_request(format!("malformed JSON body: {err}"))))?;
    let public_name = payload
        .get("model")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| fail(GatewayError::bad_request("missing required field: model")))?
        .to_string();
    let want_stream = endpoint != Endpoint::Embeddings
        && payload.get("stream").and_then(Value::as_bool).unwrap_or(false);

    // 4. Model resolution with fallback.
    let route = gateway
        .resolver
        .resolve(&public_name)
        .await
        .map_err(&fail)?;
    if want_stream && !route.model.supports_streaming {
        return Err(fail(GatewayError::bad_request(format!(
            "model {public_name} does not support streaming"
        ))));
    }

    // 5. Translation and dispatch.
    let prepared = prepare_upstream_request(
        route.kind,
        endpoint,
        &route.provider.base_url,
        &route.model.upstream_name,
        want_stream,
        request_id,
        &route.auth_material(),
        &payload,
    )
    .map_err(|err| fail(GatewayError::bad_request(err.to_string())))?;

    let usage_ids = (
        Some(api_key.id),
        Some(route.provider.id),
        Some(route.model.id),
    );
    let outcome = gateway
        .dispatcher
        .dispatch(&route, prepared, want_stream)
        .await;

    let upstream = match outcome {
        Ok(upstream) => upstream,
        Err(err) => {
            record_usage(&gateway, usage_ids, 0, 0, started, err.kind.status());
            return Err(fail(err));
        }
    };

    let family = route.kind.family();
    if want_stream {
        Ok(stream_response(
            gateway,
            family,
            public_name,
            usage_ids,
            started,
            request_id,
            upstream.body,
        ))
    } else {
        buffered_response(gateway, endpoint, family, &public_name, usage_ids, started, request_id, upstream)
            .map_err(&fail)
    }
}

fn rate_limit_error(
    fail: impl Fn(GatewayError) -> ApiError,
    decision: &polygate_core::RateDecision,
) -> ApiError {
    let retry_in = decision
        .reset_at
        .saturating_duration_since(Instant::now())
        .as_secs();
    fail(GatewayError::rate_limited(format!(
        "rate limit exceeded, retry in {retry_in}s"
    )))
    .with_header("x-ratelimit-remaining", decision.remaining.to_string())
    .with_header("x-ratelimit-reset", retry_in.to_string())
}

type UsageIds = (Option<Uuid>, Option<Uuid>, Option<Uuid>);

fn record_usage(
    gateway: &Gateway,
    (api_key_id, provider_id, model_id): UsageIds,
    input_tokens: i64,
    output_tokens: i64,
    started: Instant,
    status_code: u16,
) {
    gateway.usage.record(UsageRow {
        api_key_id,
        provider_id,
        model_id,
        input_tokens,
        output_tokens,
        latency_ms: started.elapsed().as_millis() as i64,
        status_code: i32::from(status_code),
    });
}

fn stream_response(
    gateway: Arc<Gateway>,
    family: ApiFamily,
    public_name: String,
    usage_ids: UsageIds,
    started: Instant,
    request_id: &str,
    upstream_body: UpstreamBody,
) -> Response {
    let (tx, out_rx) = tokio::sync::mpsc::channel::<Bytes>(16);
    let mut transformer = StreamTransformer::new(family, public_name, generate_chat_id());

    tokio::spawn(async move {
        let mut client_gone = false;
        match upstream_body {
            UpstreamBody::Stream(mut rx) => {
                while let Some(chunk) = rx.recv().await {
                    let out = transformer.push(&chunk);
                    if !out.is_empty() && tx.send(out).await.is_err() {
                        // Caller disconnected; dropping rx closes upstream.
                        client_gone = true;
                        break;
                    }
                }
            }
            UpstreamBody::Bytes(bytes) => {
                let out = transformer.push(&bytes);
                if !out.is_empty() && tx.send(out).await.is_err() {
                    client_gone = true;
                }
            }
        }
        if !client_gone {
            let tail = transformer.finish();
            let _ = tx.send(tail).await;
            // No on-the-fly token counting for streamed responses.
            record_usage(&gateway, usage_ids, 0, 0, started, 200);
        }
    });

    let stream = ReceiverStream::new(out_rx).map(Ok::<_, Infallible>);
    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[allow(clippy::too_many_arguments)]
fn buffered_response(
    gateway: Arc<Gateway>,
    endpoint: Endpoint,
    family: ApiFamily,
    public_name: &str,
    usage_ids: UsageIds,
    started: Instant,
    request_id: &str,
    upstream: polygate_core::UpstreamResponse,
) -> Result<Response, GatewayError> {
    let bytes = match upstream.body {
        UpstreamBody::Bytes(bytes) => bytes,
        UpstreamBody::Stream(_) => {
            return Err(GatewayError::internal(
                "buffered dispatch returned a stream body",
            ));
        }
    };

    let (body, usage) = if endpoint == Endpoint::ChatCompletions {
        let normalized = normalize_response(family, public_name, &bytes)
            .map_err(|err| GatewayError::provider(err.to_string()))?;
        let usage = usage_tokens(&normalized);
        (Bytes::from(normalized.to_string()), usage)
    } else {
        // Legacy completions and embeddings pass the upstream JSON
        // through untouched.
        let usage = serde_json::from_slice::<Value>(&bytes)
            .map(|value| usage_tokens(&value))
            .unwrap_or((0, 0));
        (bytes, usage)
    };

    record_usage(&gateway, usage_ids, usage.0, usage.1, started, upstream.status);

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}

fn usage_tokens(body: &Value) -> (i64, i64) {
    let usage = &body["usage"];
    (
        usage["prompt_tokens"].as_i64().unwrap_or(0),
        usage["completion_tokens"].as_i64().unwrap_or(0),
    )
}

/// Public model listing; no caller authentication required.
pub(crate) async fn list_models(State(gateway): State<Arc<Gateway>>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let rows = match gateway.store.list_active_models().await {
        Ok(rows) => rows,
        Err(err) => {
            return ApiError::new(
                GatewayError::internal(err.to_string()),
                &request_id,
                gateway.config.posture,
            )
            .into_response();
        }
    };

    // Fallback-chain rows share a public name; list it once.
    let mut seen = std::collections::HashSet::new();
    let data: Vec<Value> = rows
        .into_iter()
        .filter(|(model, _)| seen.insert(model.public_name.clone()))
        .map(|(model, provider)| {
            json!({
                "id": model.public_name,
                "object": "model",
                "created": model.created_at.unix_timestamp(),
                "owned_by": provider.name,
            })
        })
        .collect();

    json_response(json!({"object": "list", "data": data}), &request_id)
}

pub(crate) async fn healthz(State(gateway): State<Arc<Gateway>>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    match gateway.store.health().await {
        Ok(()) => json_response(json!({"status": "ok"}), &request_id),
        Err(err) => ApiError::new(
            GatewayError::internal(err.to_string()),
            &request_id,
            gateway.config.posture,
        )
        .into_response(),
    }
}

fn json_response(body: Value, request_id: &str) -> Response {
    let mut response = Response::new(Body::from(body.to_string()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
