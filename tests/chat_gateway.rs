use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Value};
use unlimited_bridge::config::{AppConfig, ClientAuthConfig, ServerConfig, UpstreamConfig};
use unlimited_bridge::routing::dispatch::dispatch_request;
use unlimited_bridge::state::AppState;

const UPSTREAM_TOKEN: &str = "upstream-jwt";

const EXAMPLE_CHUNKS: &[&str] = &[
    "f:{\"messageId\":\"m1\"}\n0:\"Hel",
    "lo\"\n0:\" world\"\n",
    "d:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":5,\"completionTokens\":2}}\n",
];

#[derive(Default)]
struct Captured {
    token_headers: Option<HeaderMap>,
    chat_headers: Option<HeaderMap>,
    chat_payload: Option<Value>,
}

fn tagged_body(chunks: &'static [&'static str]) -> Response {
    let stream = futures_util::stream::iter(
        chunks
            .iter()
            .map(|chunk| Ok::<Bytes, Infallible>(Bytes::from_static(chunk.as_bytes()))),
    );
    Response::new(Body::from_stream(stream))
}

async fn spawn_upstream(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

fn tagged_upstream(chunks: &'static [&'static str], captured: Arc<Mutex<Captured>>) -> Router {
    let token_capture = Arc::clone(&captured);
    Router::new()
        .route(
            "/api/token",
            get(move |headers: HeaderMap| {
                let captured = Arc::clone(&token_capture);
                async move {
                    captured.lock().unwrap().token_headers = Some(headers);
                    Json(json!({ "token": UPSTREAM_TOKEN }))
                }
            }),
        )
        .route(
            "/api/chat",
            post(move |headers: HeaderMap, Json(payload): Json<Value>| {
                let captured = Arc::clone(&captured);
                async move {
                    if headers
                        .get("x-api-token")
                        .and_then(|value| value.to_str().ok())
                        != Some(UPSTREAM_TOKEN)
                    {
                        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
                    }
                    let mut guard = captured.lock().unwrap();
                    guard.chat_headers = Some(headers);
                    guard.chat_payload = Some(payload);
                    drop(guard);
                    tagged_body(chunks)
                }
            }),
        )
}

fn build_state(base_url: String) -> Arc<AppState> {
    let config = AppConfig {
        upstream: UpstreamConfig {
            base_url,
            ..UpstreamConfig::default()
        },
        client_authentication: ClientAuthConfig {
            allowed_keys: vec!["client-key".to_string()],
        },
        ..AppConfig::default()
    };
    Arc::new(AppState::from_config(config).expect("state"))
}

/// State whose token and chat deadlines are both one second.
fn short_deadline_state(base_url: String) -> Arc<AppState> {
    let config = AppConfig {
        server: ServerConfig {
            timeout: 1,
            ..ServerConfig::default()
        },
        upstream: UpstreamConfig {
            base_url,
            token_timeout_secs: 1,
            ..UpstreamConfig::default()
        },
        client_authentication: ClientAuthConfig {
            allowed_keys: vec!["client-key".to_string()],
        },
        ..AppConfig::default()
    };
    Arc::new(AppState::from_config(config).expect("state"))
}

fn chat_request(body: &Value, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {key}"));
    }
    builder
        .body(Body::from(serde_json::to_vec(body).expect("serialize")))
        .expect("build request")
}

async fn send(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    (status, headers, body)
}

fn sse_payloads(body: &[u8]) -> Vec<String> {
    let text = std::str::from_utf8(body).expect("utf8 body");
    text.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| {
            frame
                .strip_prefix("data: ")
                .expect("data frame")
                .to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_non_streaming_chat_translates_tagged_lines() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let (base_url, server) = spawn_upstream(tagged_upstream(EXAMPLE_CHUNKS, Arc::clone(&captured))).await;
    let state = build_state(base_url.clone());

    let request = chat_request(
        &json!({
            "model": "anything",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": "hi"},
                {"role": "user", "content": [{"type": "text", "text": "again"}]}
            ],
            "temperature": 0.3
        }),
        Some("client-key"),
    );
    let (status, _, body) = send(state, request).await;
    assert_eq!(status, StatusCode::OK);

    let payload: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(payload["object"], "chat.completion");
    assert_eq!(payload["model"], "UnlimitedAI");
    assert_eq!(payload["choices"][0]["message"]["content"], "Hello world");
    assert_eq!(payload["choices"][0]["finish_reason"], "stop");
    assert_eq!(payload["usage"]["prompt_tokens"], 5);
    assert_eq!(payload["usage"]["completion_tokens"], 2);
    assert_eq!(payload["usage"]["total_tokens"], 7);

    let captured = captured.lock().unwrap();
    let upstream_payload = captured.chat_payload.as_ref().expect("chat payload");
    assert_eq!(
        upstream_payload["messages"],
        json!([{"role": "user", "content": "hello\nagain"}])
    );
    assert_eq!(upstream_payload["selectedChatModel"], "chat-model-reasoning");
    assert_eq!(upstream_payload["temperature"], 0.3);
    assert!(upstream_payload.get("max_tokens").is_none());
    assert_eq!(upstream_payload["id"].as_str().map(str::len), Some(36));

    let referer = format!("{base_url}/");
    for headers in [
        captured.token_headers.as_ref().expect("token headers"),
        captured.chat_headers.as_ref().expect("chat headers"),
    ] {
        assert_eq!(headers["referer"].to_str().unwrap(), referer);
        assert!(headers["user-agent"].to_str().unwrap().starts_with("Mozilla/5.0"));
    }

    server.abort();
}

#[tokio::test]
async fn test_streaming_chat_emits_ordered_chunks_and_done() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let (base_url, server) = spawn_upstream(tagged_upstream(EXAMPLE_CHUNKS, captured)).await;
    let state = build_state(base_url);

    let request = chat_request(
        &json!({
            "messages": [{"role": "user", "content": "hello"}],
            "stream": true
        }),
        Some("client-key"),
    );
    let (status, headers, body) = send(state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");

    let payloads = sse_payloads(&body);
    assert_eq!(payloads.len(), 5, "payloads: {payloads:?}");
    let chunks: Vec<Value> = payloads[..4]
        .iter()
        .map(|payload| serde_json::from_str(payload).expect("chunk json"))
        .collect();
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "Hello");
    assert_eq!(chunks[2]["choices"][0]["delta"]["content"], " world");
    assert_eq!(chunks[3]["choices"][0]["finish_reason"], "stop");
    assert_eq!(payloads[4], "[DONE]");

    let id = chunks[0]["id"].clone();
    assert!(chunks.iter().all(|chunk| chunk["id"] == id));
    assert!(chunks
        .iter()
        .all(|chunk| chunk["object"] == "chat.completion.chunk"));

    server.abort();
}

#[tokio::test]
async fn test_streaming_usage_chunk_when_requested() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let (base_url, server) = spawn_upstream(tagged_upstream(EXAMPLE_CHUNKS, captured)).await;
    let state = build_state(base_url);

    let request = chat_request(
        &json!({
            "messages": [{"role": "user", "content": "hello"}],
            "stream": true,
            "stream_options": {"include_usage": true}
        }),
        Some("client-key"),
    );
    let (_, _, body) = send(state, request).await;
    let payloads = sse_payloads(&body);
    assert_eq!(payloads.len(), 6);
    let usage: Value = serde_json::from_str(&payloads[4]).expect("usage json");
    assert_eq!(usage["usage"]["total_tokens"], 7);
    assert_eq!(payloads[5], "[DONE]");

    server.abort();
}

#[tokio::test]
async fn test_upstream_disconnect_mid_stream_still_closes_client_stream() {
    let app = Router::new()
        .route(
            "/api/token",
            get(|| async { Json(json!({ "token": UPSTREAM_TOKEN })) }),
        )
        .route(
            "/api/chat",
            post(|| async {
                let stream = futures_util::stream::iter(vec![
                    Ok::<Bytes, std::io::Error>(Bytes::from_static(b"0:\"partial\"\n0:\"cu")),
                    Err(std::io::Error::other("upstream crashed")),
                ])
                .then(|item| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    item
                });
                Response::new(Body::from_stream(stream))
            }),
        );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state(base_url);

    let request = chat_request(
        &json!({
            "messages": [{"role": "user", "content": "hello"}],
            "stream": true
        }),
        Some("client-key"),
    );
    let (status, _, body) = send(state, request).await;
    assert_eq!(status, StatusCode::OK);

    let payloads = sse_payloads(&body);
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));
    let terminal: Value =
        serde_json::from_str(&payloads[payloads.len() - 2]).expect("terminal json");
    assert_eq!(terminal["choices"][0]["finish_reason"], "stop");
    let content: String = payloads[..payloads.len() - 1]
        .iter()
        .filter_map(|payload| {
            let chunk: Value = serde_json::from_str(payload).ok()?;
            chunk["choices"][0]["delta"]["content"]
                .as_str()
                .map(str::to_string)
        })
        .collect();
    assert_eq!(content, "partial");

    server.abort();
}

#[tokio::test]
async fn test_upstream_error_status_maps_to_bad_gateway() {
    let app = Router::new()
        .route(
            "/api/token",
            get(|| async { Json(json!({ "token": UPSTREAM_TOKEN })) }),
        )
        .route(
            "/api/chat",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({"error": {"message": "rate limited"}})),
                )
            }),
        );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state(base_url);

    let request = chat_request(
        &json!({"messages": [{"role": "user", "content": "hello"}]}),
        Some("client-key"),
    );
    let (status, _, body) = send(state, request).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let payload: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(payload["error"]["upstream_status"], 429);
    assert!(payload["error"]["message"]
        .as_str()
        .unwrap()
        .contains("rate limited"));

    server.abort();
}

#[tokio::test]
async fn test_token_failure_maps_to_server_error() {
    let app = Router::new().route(
        "/api/token",
        get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state(base_url);

    let request = chat_request(
        &json!({"messages": [{"role": "user", "content": "hello"}], "stream": true}),
        Some("client-key"),
    );
    let (status, headers, body) = send(state, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(headers["content-type"], "application/json");
    let payload: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(payload["error"]["type"], "server_error");

    server.abort();
}

#[tokio::test]
async fn test_client_auth_and_validation_errors() {
    let state = build_state("http://127.0.0.1:9".to_string());
    let body = json!({"messages": [{"role": "user", "content": "hello"}]});

    let (status, _, _) = send(Arc::clone(&state), chat_request(&body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(Arc::clone(&state), chat_request(&body, Some("wrong"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, payload) = send(
        Arc::clone(&state),
        chat_request(&json!({"messages": []}), Some("client-key")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let payload: Value = serde_json::from_slice(&payload).expect("json");
    assert_eq!(payload["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_routes_health_models_and_not_found() {
    let state = build_state("http://127.0.0.1:9".to_string());

    let request = Request::builder()
        .uri("/")
        .body(Body::empty())
        .expect("build request");
    let (status, _, body) = send(Arc::clone(&state), request).await;
    assert_eq!(status, StatusCode::OK);
    let payload: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(payload["config"]["model"], "UnlimitedAI");

    let request = Request::builder()
        .uri("/v1/models")
        .header("authorization", "Bearer client-key")
        .body(Body::empty())
        .expect("build request");
    let (status, _, body) = send(Arc::clone(&state), request).await;
    assert_eq!(status, StatusCode::OK);
    let payload: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(payload["data"][0]["id"], "UnlimitedAI");

    let request = Request::builder()
        .uri("/v1/embeddings")
        .body(Body::empty())
        .expect("build request");
    let (status, _, _) = send(Arc::clone(&state), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("DELETE")
        .uri("/v1/chat/completions")
        .body(Body::empty())
        .expect("build request");
    let (status, _, _) = send(state, request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_base_path_prefix_is_required_when_configured() {
    let state = build_state("http://127.0.0.1:9".to_string());
    let base_path: Arc<str> = Arc::from(unlimited_bridge::routing::normalize_base_path("bridge/"));

    let request = Request::builder()
        .uri("/bridge/v1/models")
        .header("authorization", "Bearer client-key")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(Arc::clone(&state), Arc::clone(&base_path), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .uri("/v1/models")
        .header("authorization", "Bearer client-key")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(state, base_path, request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_slow_token_endpoint_maps_to_gateway_timeout() {
    let app = Router::new().route(
        "/api/token",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!({ "token": UPSTREAM_TOKEN }))
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = short_deadline_state(base_url);

    let request = chat_request(
        &json!({"messages": [{"role": "user", "content": "hello"}]}),
        Some("client-key"),
    );
    let (status, _, body) = send(state, request).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    let payload: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(payload["error"]["code"], "upstream_timeout");

    server.abort();
}

#[tokio::test]
async fn test_slow_chat_endpoint_maps_to_gateway_timeout() {
    let app = Router::new()
        .route(
            "/api/token",
            get(|| async { Json(json!({ "token": UPSTREAM_TOKEN })) }),
        )
        .route(
            "/api/chat",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                tagged_body(EXAMPLE_CHUNKS)
            }),
        );
    let (base_url, server) = spawn_upstream(app).await;
    let state = short_deadline_state(base_url);

    let request = chat_request(
        &json!({"messages": [{"role": "user", "content": "hello"}]}),
        Some("client-key"),
    );
    let (status, _, body) = send(state, request).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    let payload: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(payload["error"]["code"], "upstream_timeout");
    assert_eq!(payload["error"]["type"], "upstream_error");

    server.abort();
}
