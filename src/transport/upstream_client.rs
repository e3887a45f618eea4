use std::time::Duration;

use http::{HeaderMap, HeaderValue};

use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::protocol::upstream::{TokenResponse, UpstreamChatPayload};

const UPSTREAM_TOKEN_HEADER: &str = "x-api-token";
const MAX_ERROR_MESSAGE_LEN: usize = 500;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .no_proxy()
        .build()
        .map_err(|err| GatewayError::Config(format!("Failed to build HTTP client: {err}")))
}

fn join_endpoint(base: &url::Url, path: &str) -> Result<url::Url, GatewayError> {
    let mut joined = base.clone();
    let prefix = base.path().trim_end_matches('/');
    joined.set_path(&format!("{prefix}{path}"));
    if joined.cannot_be_a_base() {
        return Err(GatewayError::Config(format!(
            "upstream endpoint '{joined}' is not a valid base URL"
        )));
    }
    Ok(joined)
}

/// Client for the upstream's token and chat endpoints.
///
/// Endpoint URLs, the `Referer` header and the user-agent pool are resolved
/// once from config; each call draws a fresh random user agent.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    token_url: url::Url,
    chat_url: url::Url,
    referer: HeaderValue,
    user_agents: Vec<HeaderValue>,
    token_timeout: Duration,
}

impl UpstreamClient {
    /// Build the client from validated config.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when an endpoint or header value from
    /// config cannot be used, or the HTTP client fails to build.
    pub fn new(config: &AppConfig) -> Result<Self, GatewayError> {
        let pool_idle_timeout = if config.server.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.server.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            config.server.http_pool_max_idle_per_host,
            pool_idle_timeout,
            Duration::from_secs(config.server.timeout),
        )?;

        let upstream = &config.upstream;
        let base = url::Url::parse(&upstream.base_url)
            .map_err(|err| GatewayError::Config(format!("Invalid upstream base_url: {err}")))?;
        let referer = HeaderValue::from_str(&upstream.referer())
            .map_err(|err| GatewayError::Config(format!("Invalid upstream referer: {err}")))?;
        let user_agents = upstream
            .user_agents
            .iter()
            .map(|agent| {
                HeaderValue::from_str(agent)
                    .map_err(|err| GatewayError::Config(format!("Invalid user agent: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if user_agents.is_empty() {
            return Err(GatewayError::Config(
                "upstream.user_agents must not be empty".into(),
            ));
        }

        Ok(Self {
            client,
            token_url: join_endpoint(&base, &upstream.token_path)?,
            chat_url: join_endpoint(&base, &upstream.chat_path)?,
            referer,
            user_agents,
            token_timeout: Duration::from_secs(upstream.token_timeout_secs),
        })
    }

    fn random_user_agent(&self) -> HeaderValue {
        self.user_agents[fastrand::usize(..self.user_agents.len())].clone()
    }

    fn base_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(4);
        headers.insert(http::header::USER_AGENT, self.random_user_agent());
        headers.insert(http::header::REFERER, self.referer.clone());
        headers
    }

    /// Fetch a short-lived upstream token.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::TokenAcquisition`] on a non-2xx status or an
    /// unreadable body, and [`GatewayError::Timeout`] when the token deadline
    /// passes.
    pub async fn acquire_token(&self) -> Result<String, GatewayError> {
        let response = self
            .client
            .get(self.token_url.clone())
            .headers(self.base_headers())
            .timeout(self.token_timeout)
            .send()
            .await
            .map_err(|err| token_error(&err))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "upstream token request rejected");
            return Err(GatewayError::TokenAcquisition(format!(
                "token endpoint returned {}",
                status.as_u16()
            )));
        }

        let body = response.bytes().await.map_err(|err| token_error(&err))?;
        let parsed: TokenResponse = serde_json::from_slice(&body).map_err(|err| {
            GatewayError::TokenAcquisition(format!("invalid token response: {err}"))
        })?;
        if parsed.token.is_empty() {
            return Err(GatewayError::TokenAcquisition(
                "token endpoint returned an empty token".into(),
            ));
        }
        Ok(parsed.token)
    }

    /// Open the upstream chat call. The returned response's body is the
    /// tagged-line stream.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Upstream`] with the upstream status on non-2xx,
    /// and [`GatewayError::Transport`] / [`GatewayError::Timeout`] when the
    /// request cannot be completed.
    pub async fn open_chat(
        &self,
        payload: &UpstreamChatPayload,
        token: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let body = serde_json::to_vec(payload).map_err(|err| {
            GatewayError::Internal(format!("Failed to encode upstream payload: {err}"))
        })?;
        let token = HeaderValue::from_str(token).map_err(|_| {
            GatewayError::TokenAcquisition("token is not a valid header value".into())
        })?;

        let mut headers = self.base_headers();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(UPSTREAM_TOKEN_HEADER, token);

        let response = self
            .client
            .post(self.chat_url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|err| GatewayError::from_reqwest("upstream chat request failed", &err))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), "upstream chat request rejected");
        Err(GatewayError::Upstream {
            status: status.as_u16(),
            message: sanitize_upstream_error(&body),
        })
    }
}

fn token_error(err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(format!("token request timed out: {err}"))
    } else {
        GatewayError::TokenAcquisition(err.to_string())
    }
}

fn truncate_message(msg: &str) -> String {
    if msg.len() <= MAX_ERROR_MESSAGE_LEN {
        return msg.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &msg[..end])
}

/// Pull a short human-readable message out of an upstream error body.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = json
            .get("error")
            .and_then(|err| err.get("message").or(Some(err)))
            .or_else(|| json.get("message"))
            .and_then(serde_json::Value::as_str);
        if let Some(msg) = message {
            return truncate_message(msg);
        }
    }
    truncate_message(&String::from_utf8_lossy(body))
}
