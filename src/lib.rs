pub mod api;
pub mod config;
pub mod handlers;
pub mod infrastructure;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::DepositConfig;
use crate::services::transfer_store::TransferStore;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::get,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::sword::service_document,
        handlers::sword::collection,
        handlers::sword::deposit,
        handlers::sword::entry,
        handlers::sword::package,
    ),
    components(
        schemas(
            models::Project,
            models::Transfer,
            models::TransferFile,
        )
    ),
    tags(
        (name = "sword", description = "SWORD-style deposit endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub store: Arc<TransferStore>,
    pub config: DepositConfig,
}

pub fn create_app(state: AppState) -> Router {
    // The upload cap is enforced by the header validator against the
    // project's effective limit, so the framework body limit is disabled
    // for these routes.
    let deposit_api = Router::new()
        .route("/api/service", get(handlers::sword::service_document))
        .route(
            "/api/collection/:project_id",
            get(handlers::sword::collection).post(handlers::sword::deposit),
        )
        .route(
            "/api/collection/:project_id/:transfer_id",
            get(handlers::sword::entry),
        )
        .route(
            "/api/collection/:project_id/:transfer_id/package",
            get(handlers::sword::package),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::basic_auth,
        ))
        .layer(DefaultBodyLimit::disable());

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(deposit_api)
        .with_state(state)
}
