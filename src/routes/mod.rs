use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod access_requests;
pub mod audit;
pub mod auth;
pub mod documents;
pub mod folders;
pub mod health;
pub mod hr;
pub mod media;
pub mod organizations;
pub mod permissions;
pub mod share_links;
pub mod tags;
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
            get(documents::list_documents).post(documents::upload_document),
        )
        .route("/bulk/move", post(documents::bulk_move_documents))
        .route("/bulk/tags", post(documents::bulk_update_tags))
        .route(
            "/:id",
            get(documents::get_document)
                .delete(documents::delete_document)
                .patch(documents::update_document),
        )
        .route("/:id/restore", post(documents::restore_document))
        .route("/:id/download", get(documents::download_document))
        .route("/:id/access", get(documents::get_document_access))
        .route(
            "/:id/versions",
            get(documents::list_document_versions).post(documents::upload_document_version),
        )
        .route(
            "/:id/versions/:version_id/restore",
            post(documents::restore_document_version),
        )
        .route("/:id/folder", patch(documents::move_document))
        .route("/:id/tags", post(documents::assign_tags))
        .route("/:id/tags/:tag_id", delete(documents::remove_tag))
        .route(
            "/:id/permissions",
            get(permissions::list_document_permissions)
                .post(permissions::grant_document_permission),
        )
        .route(
            "/:id/permissions/:permission_id",
            delete(permissions::revoke_document_permission),
        )
        .route(
            "/:id/share-links",
            get(share_links::list_share_links).post(share_links::create_share_link),
        )
        .route(
            "/:id/share-links/:link_id",
            delete(share_links::revoke_share_link),
        )
        .route(
            "/:id/access-requests",
            get(access_requests::list_document_access_requests)
                .post(access_requests::create_access_request),
        )
        .route(
            "/:id/media",
            get(media::list_media_items).post(media::create_media_item),
        )
        .route(
            "/:id/media/:item_id",
            patch(media::update_media_item).delete(media::delete_media_item),
        );

    let public_routes = Router::new()
        .route("/download/:token", get(documents::download_with_token))
        .route("/share/:token", post(share_links::resolve_share_link))
        .route(
            "/share/:token/download",
            post(share_links::download_via_share_link),
        );

    let folders_routes = Router::new()
        .route("/", post(folders::create_folder))
        .route("/path", post(folders::ensure_folder_path))
        .route(
            "/:id",
            delete(folders::delete_folder).patch(folders::update_folder),
        )
        .route("/:id/contents", get(folders::list_folder_contents))
        .route(
            "/:id/permissions",
            get(permissions::list_folder_permissions).post(permissions::grant_folder_permission),
        )
        .route(
            "/:id/permissions/:permission_id",
            delete(permissions::revoke_folder_permission),
        );

    let tags_routes = Router::new()
        .route("/", get(tags::list_tags).post(tags::create_tag))
        .route("/:id", patch(tags::update_tag).delete(tags::delete_tag));

    let users_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route(
            "/:id",
            patch(users::update_user).delete(users::deactivate_user),
        );

    let organizations_routes = Router::new()
        .route(
            "/",
            get(organizations::list_organizations).post(organizations::create_organization),
        )
        .route("/:id", patch(organizations::update_organization));

    let access_requests_routes = Router::new()
        .route("/", get(access_requests::list_my_access_requests))
        .route("/:id/approve", post(access_requests::approve_access_request))
        .route("/:id/deny", post(access_requests::deny_access_request));

    let employees_routes = Router::new()
        .route("/", get(hr::list_employees).post(hr::create_employee))
        .route(
            "/:id",
            get(hr::get_employee)
                .patch(hr::update_employee)
                .delete(hr::delete_employee),
        );

    let audit_routes = Router::new().route("/", get(audit::list_audit_logs));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/documents", documents_routes)
        .nest("/api/folders", folders_routes)
        .nest("/api/tags", tags_routes)
        .nest("/api/users", users_routes)
        .nest("/api/organizations", organizations_routes)
        .nest("/api/access-requests", access_requests_routes)
        .nest("/api/employees", employees_routes)
        .nest("/api/audit", audit_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 512))
}
