use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::access::{self, AccessLevel};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Document, MediaItem, NewMediaItem};
use crate::schema::{documents, media_items};
use crate::state::AppState;

use super::documents::to_iso;

#[derive(Deserialize)]
pub struct CreateMediaItemRequest {
    pub kind: String,
    pub title: String,
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
pub struct UpdateMediaItemRequest {
    pub title: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Serialize)]
pub struct MediaItemResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub kind: String,
    pub title: String,
    pub created_by: Uuid,
    pub metadata: Value,
    pub created_at: String,
}

impl From<MediaItem> for MediaItemResponse {
    fn from(item: MediaItem) -> Self {
        Self {
            id: item.id,
            document_id: item.document_id,
            kind: item.kind,
            title: item.title,
            created_by: item.created_by,
            metadata: item.metadata,
            created_at: to_iso(item.created_at),
        }
    }
}

fn load_document_with_access(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    document_id: Uuid,
    need: AccessLevel,
) -> AppResult<Document> {
    let doc: Document = documents::table.find(document_id).first(conn)?;
    if doc.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }
    access::require_document_access(conn, user, &doc, need)?;
    Ok(doc)
}

pub async fn list_media_items(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<MediaItemResponse>>> {
    let mut conn = state.db()?;
    load_document_with_access(&mut conn, &user, document_id, AccessLevel::Viewer)?;

    let rows: Vec<MediaItem> = media_items::table
        .filter(media_items::document_id.eq(document_id))
        .order(media_items::created_at.asc())
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(MediaItemResponse::from).collect()))
}

pub async fn create_media_item(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateMediaItemRequest>,
) -> AppResult<(StatusCode, Json<MediaItemResponse>)> {
    let kind = payload.kind.trim();
    if kind.is_empty() {
        return Err(AppError::bad_request("kind must not be empty"));
    }
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    let metadata = match payload.metadata {
        Some(metadata) => {
            if !metadata.is_object() {
                return Err(AppError::bad_request("metadata must be a JSON object"));
            }
            metadata
        }
        None => Value::Object(Default::default()),
    };

    let mut conn = state.db()?;
    load_document_with_access(&mut conn, &user, document_id, AccessLevel::Editor)?;

    let new_item = NewMediaItem {
        id: Uuid::new_v4(),
        document_id,
        kind: kind.to_string(),
        title: title.to_string(),
        created_by: user.user_id,
        metadata,
    };

    diesel::insert_into(media_items::table)
        .values(&new_item)
        .execute(&mut conn)?;

    let created: MediaItem = media_items::table.find(new_item.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(MediaItemResponse::from(created))))
}

pub async fn update_media_item(
    State(state): State<AppState>,
    Path((document_id, item_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateMediaItemRequest>,
) -> AppResult<Json<MediaItemResponse>> {
    let mut conn = state.db()?;
    load_document_with_access(&mut conn, &user, document_id, AccessLevel::Editor)?;

    let existing: MediaItem = media_items::table.find(item_id).first(&mut conn)?;
    if existing.document_id != document_id {
        return Err(AppError::not_found());
    }

    let title = match payload.title {
        Some(title) => {
            let trimmed = title.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("title must not be empty"));
            }
            trimmed
        }
        None => existing.title.clone(),
    };
    let metadata = match payload.metadata {
        Some(metadata) => {
            if !metadata.is_object() {
                return Err(AppError::bad_request("metadata must be a JSON object"));
            }
            metadata
        }
        None => existing.metadata.clone(),
    };

    let now = Utc::now().naive_utc();
    diesel::update(media_items::table.find(item_id))
        .set((
            media_items::title.eq(&title),
            media_items::metadata.eq(&metadata),
            media_items::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let updated: MediaItem = media_items::table.find(item_id).first(&mut conn)?;
    Ok(Json(MediaItemResponse::from(updated)))
}

pub async fn delete_media_item(
    State(state): State<AppState>,
    Path((document_id, item_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    load_document_with_access(&mut conn, &user, document_id, AccessLevel::Editor)?;

    let existing: MediaItem = media_items::table.find(item_id).first(&mut conn)?;
    if existing.document_id != document_id {
        return Err(AppError::not_found());
    }

    diesel::delete(media_items::table.find(item_id)).execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}
