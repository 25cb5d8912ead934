//! HTTP surface: page routes, health probe and response logging.

mod error;
mod handlers;
mod middleware;

pub use error::ApiError;
pub use middleware::{RequestContext, log_responses, set_request_context};

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get},
};

use crate::application::pages::{ArchivePageService, PublishedPageService};
use crate::application::repos::HealthRepo;

#[derive(Clone)]
pub struct HttpState {
    pub archive: Arc<ArchivePageService>,
    pub published: Arc<PublishedPageService>,
    pub health: Arc<dyn HealthRepo>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route(
            "/api/v1/sites/{site_id}/pages/{slug}",
            delete(handlers::archive_page),
        )
        .route(
            "/api/v1/sites/{site_id}/pages/{slug}/published",
            get(handlers::get_published_page),
        )
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
