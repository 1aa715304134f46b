//! HTTP surface: render endpoints, health check and embedded pages.

mod health;
mod middleware;
mod render;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::get,
};

use crate::{application::render::RenderService, infra::assets};

pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use render::{
    CACHE_CONTROL_VALUE, RenderParams, RenderPayload, SIZE_ESTIMATE_HEADER, TASK_ID_HEADER,
};

use health::health;
use middleware::{log_responses, set_request_context};
use render::{render_get, render_post};

#[derive(Clone)]
pub struct HttpState {
    pub renderer: Arc<dyn RenderService>,
}

impl HttpState {
    pub fn new(renderer: Arc<dyn RenderService>) -> Self {
        Self { renderer }
    }
}

pub fn build_router(state: HttpState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/render", get(render_get).post(render_post))
        // Kept for clients of the older advanced form.
        .route("/api/render-complex", get(render_get).post(render_post))
        .route("/health", get(health))
        .route("/", get(assets::serve_index))
        .route("/complex.html", get(assets::serve_complex))
        .route("/static/{*path}", get(assets::serve_static))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
        .layer(from_fn(log_responses))
        .layer(from_fn(set_request_context))
}
