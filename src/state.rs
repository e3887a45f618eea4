use crate::auth::{authenticate, build_allowed_key_set, AllowedClientKeys};
use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::transport::UpstreamClient;

/// Shared application state accessible to all handlers.
///
/// Immutable after startup; requests share nothing mutable through it.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: UpstreamClient,
    allowed_client_keys: AllowedClientKeys,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AppConfig,
        upstream: UpstreamClient,
        allowed_client_keys: AllowedClientKeys,
    ) -> Self {
        Self {
            config,
            upstream,
            allowed_client_keys,
        }
    }

    /// Build the state from a validated config.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` when the upstream client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, GatewayError> {
        let upstream = UpstreamClient::new(&config)?;
        let allowed_client_keys = build_allowed_key_set(&config);
        Ok(Self::new(config, upstream, allowed_client_keys))
    }

    /// Authenticate a request using the prebuilt key index.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unauthorized` or `GatewayError::Forbidden` when
    /// the bearer key is missing or not allowed.
    pub fn authenticate(&self, headers: &http::HeaderMap) -> Result<(), GatewayError> {
        authenticate(headers, &self.allowed_client_keys)
    }
}
