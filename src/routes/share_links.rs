use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::access::{self, AccessLevel};
use crate::audit::{self, ClientMeta};
use crate::auth::{password, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::models::{Document, DocumentVersion, NewShareLink, ShareLink};
use crate::schema::{document_versions, documents, share_links};
use crate::state::AppState;

use super::documents::{serve_version, to_iso};

#[derive(Deserialize)]
pub struct CreateShareLinkRequest {
    pub access_level: String,
    pub password: Option<String>,
    pub expires_at: Option<String>,
    pub max_uses: Option<i32>,
    #[serde(default)]
    pub allow_download: bool,
}

#[derive(Deserialize, Default)]
pub struct ResolveShareLinkRequest {
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct ShareLinkResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub token: String,
    pub access_level: String,
    pub allow_download: bool,
    pub has_password: bool,
    pub current_uses: i32,
    pub max_uses: Option<i32>,
    pub expires_at: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

impl From<ShareLink> for ShareLinkResponse {
    fn from(link: ShareLink) -> Self {
        Self {
            id: link.id,
            document_id: link.document_id,
            token: link.token,
            access_level: link.access_level,
            allow_download: link.allow_download,
            has_password: link.password_hash.is_some(),
            current_uses: link.current_uses,
            max_uses: link.max_uses,
            expires_at: link.expires_at.map(to_iso),
            is_active: link.is_active,
            created_at: to_iso(link.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct SharedDocumentResponse {
    pub document_id: Uuid,
    pub title: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub access_level: String,
    pub allow_download: bool,
}

fn generate_share_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub async fn create_share_link(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: ClientMeta,
    Json(payload): Json<CreateShareLinkRequest>,
) -> AppResult<(StatusCode, Json<ShareLinkResponse>)> {
    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Owner)?;

    let access_level = match AccessLevel::parse(&payload.access_level) {
        Some(level @ (AccessLevel::Viewer | AccessLevel::Commenter)) => level,
        _ => {
            return Err(AppError::bad_request(
                "share link access_level must be viewer or commenter",
            ))
        }
    };

    if let Some(max_uses) = payload.max_uses {
        if max_uses < 1 {
            return Err(AppError::bad_request("max_uses must be at least 1"));
        }
    }

    let expires_at = match payload.expires_at.as_deref() {
        Some(raw) => Some(
            chrono::DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.naive_utc())
                .map_err(|_| AppError::bad_request("expires_at must be RFC 3339"))?,
        ),
        None => None,
    };

    let password_hash = match payload.password.as_deref() {
        Some(pw) if !pw.is_empty() => Some(
            password::hash_password(pw)
                .map_err(|err| AppError::internal(format!("failed to hash password: {err}")))?,
        ),
        _ => None,
    };

    let new_link = NewShareLink {
        id: Uuid::new_v4(),
        document_id,
        token: generate_share_token(),
        password_hash,
        access_level: access_level.as_str().to_string(),
        allow_download: payload.allow_download,
        max_uses: payload.max_uses,
        expires_at,
        created_by: user.user_id,
    };

    diesel::insert_into(share_links::table)
        .values(&new_link)
        .execute(&mut conn)?;

    let created: ShareLink = share_links::table.find(new_link.id).first(&mut conn)?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_SHARE_LINK_CREATE,
        Some(document_id),
        json!({
            "share_link_id": created.id,
            "access_level": created.access_level,
            "allow_download": created.allow_download,
        }),
        &meta,
    );

    Ok((StatusCode::CREATED, Json(ShareLinkResponse::from(created))))
}

pub async fn list_share_links(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ShareLinkResponse>>> {
    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Owner)?;

    let rows: Vec<ShareLink> = share_links::table
        .filter(share_links::document_id.eq(document_id))
        .order(share_links::created_at.desc())
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(ShareLinkResponse::from).collect()))
}

pub async fn revoke_share_link(
    State(state): State<AppState>,
    Path((document_id, link_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    meta: ClientMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Owner)?;

    let link: ShareLink = share_links::table.find(link_id).first(&mut conn)?;
    if link.document_id != document_id {
        return Err(AppError::not_found());
    }

    let now = Utc::now().naive_utc();
    diesel::update(share_links::table.find(link_id))
        .set((
            share_links::is_active.eq(false),
            share_links::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_SHARE_LINK_REVOKE,
        Some(document_id),
        json!({ "share_link_id": link_id }),
        &meta,
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Resolves a share token and counts the use. Checks run in a fixed order so
/// a caller cannot probe the password on an already dead link.
fn redeem_share_link(
    conn: &mut PgConnection,
    token: &str,
    supplied_password: Option<&str>,
) -> AppResult<(ShareLink, Document)> {
    conn.transaction::<_, AppError, _>(|conn| {
        let link: Option<ShareLink> = share_links::table
            .filter(share_links::token.eq(token))
            .for_update()
            .first(conn)
            .optional()?;
        let link = link.ok_or_else(AppError::not_found)?;

        if !link.is_active {
            return Err(AppError::gone("share link has been revoked"));
        }

        let now = Utc::now().naive_utc();
        if let Some(expires_at) = link.expires_at {
            if expires_at <= now {
                return Err(AppError::gone("share link has expired"));
            }
        }

        if let Some(max_uses) = link.max_uses {
            if link.current_uses >= max_uses {
                return Err(AppError::gone("share link usage limit reached"));
            }
        }

        if let Some(hash) = link.password_hash.as_deref() {
            let supplied = supplied_password.ok_or_else(AppError::unauthorized)?;
            let valid = password::verify_password(supplied, hash)
                .map_err(|err| AppError::internal(format!("password verification failed: {err}")))?;
            if !valid {
                return Err(AppError::unauthorized());
            }
        }

        let doc: Document = documents::table.find(link.document_id).first(conn)?;
        if doc.deleted_at.is_some() {
            return Err(AppError::not_found());
        }

        diesel::update(share_links::table.find(link.id))
            .set((
                share_links::current_uses.eq(link.current_uses + 1),
                share_links::updated_at.eq(now),
            ))
            .execute(conn)?;

        Ok((link, doc))
    })
}

pub async fn resolve_share_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
    meta: ClientMeta,
    payload: Option<Json<ResolveShareLinkRequest>>,
) -> AppResult<Json<SharedDocumentResponse>> {
    let mut conn = state.db()?;
    let supplied = payload.as_ref().and_then(|p| p.password.as_deref());

    let (link, doc) = redeem_share_link(&mut conn, &token, supplied)?;

    let version: DocumentVersion = document_versions::table
        .find(doc.current_version_id)
        .first(&mut conn)?;

    audit::record(
        &mut conn,
        None,
        audit::ACTION_SHARE_LINK_ACCESS,
        Some(doc.id),
        json!({ "share_link_id": link.id }),
        &meta,
    );

    Ok(Json(SharedDocumentResponse {
        document_id: doc.id,
        title: doc.title,
        filename: doc.filename,
        content_type: doc.content_type,
        size_bytes: version.size_bytes,
        access_level: link.access_level,
        allow_download: link.allow_download,
    }))
}

pub async fn download_via_share_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
    meta: ClientMeta,
    payload: Option<Json<ResolveShareLinkRequest>>,
) -> AppResult<Response> {
    let mut conn = state.db()?;
    let supplied = payload.as_ref().and_then(|p| p.password.as_deref());

    let (link, doc) = redeem_share_link(&mut conn, &token, supplied)?;
    if !link.allow_download {
        return Err(AppError::forbidden("downloads are disabled for this link"));
    }

    let version: DocumentVersion = document_versions::table
        .find(doc.current_version_id)
        .first(&mut conn)?;

    audit::record(
        &mut conn,
        None,
        audit::ACTION_SHARE_LINK_DOWNLOAD,
        Some(doc.id),
        json!({ "share_link_id": link.id }),
        &meta,
    );

    serve_version(&state, &doc, &version).await
}
