//! HTTP surface: routes, caller auth and the middleware stack around them.

pub mod client;
pub mod client_auth;
pub mod request_id;

use std::sync::Arc;

use axum::{
    extract::Request,
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

use crate::backends::Backend;

/// Shared, read-only request state.
pub struct AppState {
    pub backend: Arc<dyn Backend>,
}

impl AppState {
    pub fn new(backend: Arc<dyn Backend>) -> Arc<Self> {
        Arc::new(Self { backend })
    }
}

/// The full application: routes plus CORS, request ids and request tracing.
///
/// Layer order, outermost first: trace, request id, CORS, OPTIONS short-circuit.
pub fn app(state: Arc<AppState>) -> Router {
    client::router(state)
        .layer(middleware::from_fn(options_short_circuit))
        .layer(cors_layer())
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
        .expose_headers([header::CONTENT_LENGTH])
}

/// Any OPTIONS request that gets past the CORS layer is answered with an
/// empty 200 here, before routing and auth.
async fn options_short_circuit(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(req).await
}
