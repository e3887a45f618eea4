use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "unlimited-bridge is running",
        "config": {
            "model": config.upstream.model_name,
            "upstream_base_url": config.upstream.base_url,
            "client_keys_count": config.client_authentication.allowed_keys.len(),
            "features": {
                "log_level": config.features.log_level,
                "merge_user_messages": config.features.merge_user_messages,
                "strip_trailing_newline": config.features.strip_trailing_newline,
                "flush_unterminated_line": config.features.flush_unterminated_line,
            }
        }
    }))
}
