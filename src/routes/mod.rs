use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod audit;
pub mod auth;
pub mod config;
pub mod documents;
pub mod health;
pub mod notifications;
pub mod reviews;
pub mod users;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::create_document),
        )
        .route(
            "/:id",
            get(documents::get_document).patch(documents::update_document),
        )
        .route("/:id/upload", post(documents::upload_document_file))
        .route("/:id/download", get(documents::download_document_file))
        .route("/:id/versions", get(documents::list_versions))
        .route("/:id/submit-review", post(documents::submit_for_review))
        .route("/:id/reviews", get(documents::list_reviews))
        .route(
            "/:id/reviews/:task_id/approve",
            post(documents::decide_review),
        )
        .route("/:id/publish", post(documents::publish_document))
        .route("/:id/new-version", post(documents::start_new_version))
        .route("/:id/confirm-read", post(documents::confirm_read));

    let reviews_routes = Router::new().route("/pending", get(reviews::list_pending_reviews));

    let config_routes = Router::new()
        .route("/areas", get(config::list_areas).post(config::create_area))
        .route(
            "/areas/:id",
            patch(config::update_area).delete(config::deactivate_area),
        )
        .route(
            "/document-types",
            get(config::list_document_types).post(config::create_document_type),
        )
        .route(
            "/document-types/:id",
            patch(config::update_document_type).delete(config::deactivate_document_type),
        );

    let notifications_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route(
            "/mark-all-read",
            post(notifications::mark_all_notifications_read),
        )
        .route(
            "/:id",
            delete(notifications::delete_notification),
        )
        .route("/:id/read", patch(notifications::mark_notification_read))
        .route("/:id/archive", patch(notifications::archive_notification))
        .route("/:id/restore", patch(notifications::restore_notification));

    let users_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route(
            "/:id",
            patch(users::update_user).delete(users::deactivate_user),
        )
        .route("/:id/reactivate", post(users::reactivate_user));

    let audit_routes = Router::new().route("/", get(audit::list_audit_entries));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/documents", documents_routes)
        .nest("/reviews", reviews_routes)
        .nest("/config", config_routes)
        .nest("/notifications", notifications_routes)
        .nest("/users", users_routes)
        .nest("/audit", audit_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/auth", auth_routes)
        .route("/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024 * 64))
}
