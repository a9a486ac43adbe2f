mod error;
mod proxy;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use polygate_core::Gateway;

pub use error::ApiError;

/// Binds the public OpenAI-compatible surface onto a wired gateway.
pub fn gateway_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(proxy::chat_completions))
        .route("/v1/completions", post(proxy::completions))
        .route("/v1/embeddings", post(proxy::embeddings))
        .route("/v1/models", get(proxy::list_models))
        .route("/healthz", get(proxy::healthz))
        .with_state(gateway)
}
