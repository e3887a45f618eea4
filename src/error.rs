/// Gateway error type used across all modules.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Failed to acquire upstream token: {0}")]
    TokenAcquisition(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream timed out: {0}")]
    Timeout(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code and error type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    BadGateway,
    Timeout,
    ServerError,
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            GatewayError::Unauthorized(_) => ErrorCategory::Authentication,
            GatewayError::Forbidden(_) => ErrorCategory::Permission,
            GatewayError::Upstream { .. } | GatewayError::Transport(_) => {
                ErrorCategory::BadGateway
            }
            GatewayError::Timeout(_) => ErrorCategory::Timeout,
            GatewayError::Config(_)
            | GatewayError::TokenAcquisition(_)
            | GatewayError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    /// Map a `reqwest` failure, keeping deadline expiry distinct from other
    /// transport errors.
    #[must_use]
    pub fn from_reqwest(context: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(format!("{context}: {err}"))
        } else {
            GatewayError::Transport(format!("{context}: {err}"))
        }
    }
}

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::Permission => http::StatusCode::FORBIDDEN,
        ErrorCategory::BadGateway => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::Timeout => http::StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn openai_error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::Authentication => "authentication_error",
        ErrorCategory::Permission => "permission_error",
        ErrorCategory::BadGateway | ErrorCategory::Timeout => "upstream_error",
        ErrorCategory::ServerError => "server_error",
    }
}

fn openai_error_code(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request",
        ErrorCategory::Authentication => "invalid_api_key",
        ErrorCategory::Permission => "permission_denied",
        ErrorCategory::BadGateway => "bad_gateway",
        ErrorCategory::Timeout => "upstream_timeout",
        ErrorCategory::ServerError => "server_error",
    }
}

/// Format an error as an `OpenAI` error envelope, returning (`status_code`, JSON body).
///
/// Upstream failures also carry the upstream status code so clients can tell a
/// rejected chat call apart from a gateway fault.
#[must_use]
pub fn format_error(err: &GatewayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = http_status_for_category(cat);
    let mut body = serde_json::json!({
        "error": {
            "message": err.to_string(),
            "type": openai_error_type(cat),
            "code": openai_error_code(cat),
            "param": null,
        }
    });
    if let GatewayError::Upstream {
        status: upstream_status,
        ..
    } = err
    {
        body["error"]["upstream_status"] = serde_json::Value::from(*upstream_status);
    }
    (status, body)
}

/// Convert a `GatewayError` into an axum response.
#[must_use]
pub fn into_axum_response(err: &GatewayError) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err);
    (status, axum::Json(body)).into_response()
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_maps_to_bad_gateway_with_status() {
        let err = GatewayError::Upstream {
            status: 429,
            message: "slow down".to_string(),
        };
        let (status, body) = format_error(&err);
        assert_eq!(status, http::StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["upstream_status"], 429);
        assert_eq!(body["error"]["type"], "upstream_error");
    }

    #[test]
    fn test_auth_errors_split_401_and_403() {
        let (missing, _) = format_error(&GatewayError::Unauthorized("Missing API key".into()));
        let (wrong, body) = format_error(&GatewayError::Forbidden("Invalid API key".into()));
        assert_eq!(missing, http::StatusCode::UNAUTHORIZED);
        assert_eq!(wrong, http::StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "permission_denied");
        assert!(body["error"]["param"].is_null());
    }

    #[test]
    fn test_token_acquisition_is_server_error() {
        let err = GatewayError::TokenAcquisition("status 503".into());
        let (status, body) = format_error(&err);
        assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Failed to acquire upstream token"));
        assert!(body["error"].get("upstream_status").is_none());
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let (status, body) = format_error(&GatewayError::Timeout("chat call".into()));
        assert_eq!(status, http::StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"]["code"], "upstream_timeout");
    }
}
