//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use crate::trace::trace_id_middleware;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{get, post};
use chunkyard_core::config::CorsConfig;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Room for multipart framing and the text fields around the file part.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;
    let chunk_limit = usize::try_from(server.max_chunk_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);
    let object_limit = usize::try_from(server.max_object_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let upload_routes = Router::new()
        .route(
            "/objects/chunked",
            post(handlers::upload_chunk).layer(DefaultBodyLimit::max(chunk_limit)),
        )
        .route(
            "/objects",
            post(handlers::upload_object)
                .layer(DefaultBodyLimit::max(object_limit))
                .get(handlers::list_objects)
                .delete(handlers::delete_object),
        );

    let read_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/objects/download", get(handlers::download_object))
        .route("/objects/stat", get(handlers::stat_object))
        .route("/objects/presigned", get(handlers::presigned_url))
        .route(
            "/buckets",
            get(handlers::list_buckets)
                .post(handlers::create_bucket)
                .delete(handlers::delete_bucket),
        );

    let cors = cors_layer(&server.cors);

    // Order of execution: TraceLayer -> CORS -> trace id -> Handler
    Router::new()
        .merge(upload_routes)
        .merge(read_routes)
        .layer(middleware::from_fn(trace_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the CORS policy. `"*"` mirrors the request origin so that
/// credentials can still be allowed.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origin = if config.allows_any_origin() {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(config.allow_credentials)
}
