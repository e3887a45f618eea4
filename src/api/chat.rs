use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use futures_util::StreamExt;

use crate::config::AppConfig;
use crate::error::{into_axum_response, GatewayError};
use crate::protocol::openai_chat::ChatCompletionRequest;
use crate::protocol::upstream::{build_upstream_messages, UpstreamChatPayload};
use crate::state::AppState;
use crate::stream::{translate_non_streaming, translate_streaming, OutboundEnvelope, TranslateOptions};
use crate::util::random_uuid;

/// `POST /v1/chat/completions`.
pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handler_inner(&state, &headers, &body).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "chat completion request failed");
            into_axum_response(&err)
        }
    }
}

async fn handler_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, GatewayError> {
    state.authenticate(headers)?;
    let request = parse_chat_request(body)?;
    let payload = build_upstream_payload(&state.config, &request);
    tracing::debug!(
        stream = request.is_stream(),
        inbound_messages = request.messages.len(),
        upstream_messages = payload.messages.len(),
        "forwarding chat completion"
    );

    let token = state.upstream.acquire_token().await?;
    let upstream_response = state.upstream.open_chat(&payload, &token).await?;

    let envelope = OutboundEnvelope::new(state.config.upstream.model_name.as_str());
    let options = TranslateOptions::from_features(&state.config.features, request.include_usage());
    let byte_stream = upstream_response.bytes_stream();

    if request.is_stream() {
        let frames = translate_streaming(byte_stream, envelope, options);
        return Ok(sse_ok_response(Body::from_stream(
            frames.map(Ok::<Bytes, Infallible>),
        )));
    }

    let completion = translate_non_streaming(byte_stream, &envelope, &options).await?;
    Ok(Json(completion).into_response())
}

fn parse_chat_request(body: &Bytes) -> Result<ChatCompletionRequest, GatewayError> {
    let request: ChatCompletionRequest = serde_json::from_slice(body).map_err(|e| {
        GatewayError::InvalidRequest(format!("Invalid chat completion request body: {e}"))
    })?;
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages must contain at least one message".into(),
        ));
    }
    if request.messages.iter().any(|msg| msg.role.trim().is_empty()) {
        return Err(GatewayError::InvalidRequest(
            "every message must have a role".into(),
        ));
    }
    Ok(request)
}

fn build_upstream_payload(config: &AppConfig, request: &ChatCompletionRequest) -> UpstreamChatPayload {
    let forward = config.upstream.forward_sampling_params;
    UpstreamChatPayload {
        messages: build_upstream_messages(&request.messages, config.features.merge_user_messages),
        id: random_uuid().to_string(),
        selected_chat_model: config.upstream.selected_chat_model.clone(),
        temperature: request.temperature.clone().filter(|_| forward),
        max_tokens: request.max_tokens.clone().filter(|_| forward),
    }
}

#[inline]
fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_empty_messages() {
        let err = parse_chat_request(&Bytes::from_static(br#"{"messages":[]}"#)).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn test_parse_rejects_missing_messages_and_bad_json() {
        let err = parse_chat_request(&Bytes::from_static(br#"{"model":"x"}"#)).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
        let err = parse_chat_request(&Bytes::from_static(b"not json")).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn test_parse_rejects_blank_role() {
        let err = parse_chat_request(&Bytes::from_static(
            br#"{"messages":[{"role":" ","content":"x"}]}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn test_build_upstream_payload_forwards_sampling_params() {
        let request = parse_chat_request(&Bytes::from_static(
            br#"{"messages":[{"role":"system","content":"s"},{"role":"user","content":"hi"}],"temperature":0.5,"max_tokens":32}"#,
        ))
        .unwrap();
        let mut config = AppConfig::default();
        let payload = build_upstream_payload(&config, &request);
        assert_eq!(payload.messages.len(), 1);
        assert_eq!(payload.messages[0].content, "hi");
        assert_eq!(payload.selected_chat_model, "chat-model-reasoning");
        assert_eq!(payload.temperature, Some(serde_json::json!(0.5)));
        assert_eq!(payload.max_tokens, Some(serde_json::json!(32)));
        assert_eq!(payload.id.len(), 36);

        config.upstream.forward_sampling_params = false;
        let payload = build_upstream_payload(&config, &request);
        assert!(payload.temperature.is_none());
        assert!(payload.max_tokens.is_none());
    }

    #[test]
    fn test_sse_response_headers() {
        let response = sse_ok_response(Body::empty());
        let headers = response.headers();
        assert_eq!(headers[http::header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[http::header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[http::header::CONNECTION], "keep-alive");
    }
}
