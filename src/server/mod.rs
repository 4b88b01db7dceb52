mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::verify_handler,
        api::attend_handler,
        api::away_handler,
        api::undo_handler,
        api::enroll_handler,
        api::list_handler,
        api::delete_handler,
        api::metrics_handler,
    ),
    components(schemas(
        types::VerifyForm,
        types::SessionForm,
        types::EnrollForm,
        types::UndoResponse
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/verify", post(api::verify_handler))
        .route("/attend", post(api::attend_handler))
        .route("/away", post(api::away_handler))
        .route("/undo", post(api::undo_handler))
        .route("/enroll", post(api::enroll_handler))
        .route("/identities", get(api::list_handler))
        .route("/identities/{key}", delete(api::delete_handler))
        .route("/metrics", get(api::metrics_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .with_state(state)
}
