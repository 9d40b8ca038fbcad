use std::{collections::HashMap, path::Path as FsPath, time::Duration};

use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::{prelude::*, select, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::folders::gather_descendant_folder_ids;
use crate::access::{self, AccessLevel};
use crate::audit::{self, ClientMeta};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{
    Document, DocumentVersion, Folder, NewDocument, NewDocumentTag, NewDocumentVersion, Tag,
};
use crate::schema::{
    document_tags, document_versions, documents, folders, refresh_tokens::dsl as refresh_dsl, tags,
};
use crate::state::AppState;

const PRESIGNED_URL_EXPIRY_SECONDS: u64 = 300;

fn inline_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    ))
}

#[derive(Deserialize)]
pub struct DocumentListQuery {
    pub folder_id: Option<Uuid>,
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default)]
    pub include_descendants: Option<bool>,
    pub tags: Option<String>,
}

#[derive(Serialize)]
pub struct TagResponse {
    pub id: Uuid,
    pub label: String,
    pub color: Option<String>,
}

impl From<Tag> for TagResponse {
    fn from(tag: Tag) -> Self {
        Self {
            id: tag.id,
            label: tag.label,
            color: tag.color,
        }
    }
}

#[derive(Serialize, Clone)]
pub struct DocumentVersionResponse {
    pub id: Uuid,
    pub version_number: i32,
    pub storage_backend: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub created_by: Uuid,
    pub created_at: String,
    pub metadata: Value,
}

#[derive(Serialize, Clone)]
pub struct DocumentCurrentVersionResponse {
    #[serde(flatten)]
    pub version: DocumentVersionResponse,
    pub download_path: String,
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    pub filename: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub folder_id: Option<Uuid>,
    pub created_by: Uuid,
    pub organization_id: Option<Uuid>,
    pub uploaded_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
    pub expires_at: Option<String>,
    pub metadata: Value,
    pub tags: Vec<TagResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<DocumentCurrentVersionResponse>,
}

#[derive(Serialize)]
pub struct DocumentDetailResponse {
    pub document: DocumentResponse,
}

#[derive(Serialize)]
pub struct DocumentDownloadResponse {
    pub url: String,
    pub expires_in: u64,
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
}

#[derive(Serialize)]
pub struct DocumentAccessResponse {
    pub document_id: Uuid,
    pub access_level: String,
}

#[derive(Deserialize)]
pub struct BulkMoveRequest {
    pub document_ids: Vec<Uuid>,
    pub folder_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct BulkMoveResponse {
    pub updated: usize,
}

#[derive(Deserialize)]
pub struct UpdateDocumentRequest {
    pub title: Option<String>,
    pub metadata: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_explicit_null")]
    pub expires_at: Option<Value>,
}

/// Keeps an explicit JSON `null` as `Some(Value::Null)` instead of collapsing
/// it into `None`, so `parse_expires_patch` can tell null from omitted.
fn deserialize_explicit_null<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkTagAction {
    Add,
    Remove,
}

#[derive(Deserialize)]
pub struct BulkTagRequest {
    pub document_ids: Vec<Uuid>,
    pub tag_ids: Vec<Uuid>,
    pub action: BulkTagAction,
}

#[derive(Serialize)]
pub struct BulkTagResponse {
    pub added: usize,
    pub removed: usize,
}

#[derive(Deserialize)]
pub struct MoveDocumentRequest {
    pub folder_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct AssignTagsRequest {
    pub tag_ids: Vec<Uuid>,
}

struct UploadRequest {
    bytes: Vec<u8>,
    original_name: String,
    content_type: Option<String>,
    folder_id: Option<Uuid>,
    title: Option<String>,
    metadata: Value,
    expires_at: Option<NaiveDateTime>,
}

struct UploadOutcome {
    detail: DocumentDetailResponse,
    created: bool,
}

pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<DocumentListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;

    let DocumentListQuery {
        folder_id,
        include_deleted,
        include_descendants,
        tags,
    } = params;

    // Deleted documents are only visible to admins.
    let include_deleted = include_deleted && user.is_admin();

    let mut docs_query = documents::table.into_boxed();

    if !include_deleted {
        docs_query = docs_query.filter(documents::deleted_at.is_null());
    }

    let tags_param = tags
        .as_ref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_owned());

    let mut include_descendants = include_descendants.unwrap_or_else(|| folder_id.is_some());
    if tags_param.is_some() {
        include_descendants = true;
    }

    match (folder_id, include_descendants) {
        (Some(folder_id), true) => {
            let descendant_ids = gather_descendant_folder_ids(&mut conn, folder_id)?;
            docs_query = docs_query.filter(documents::folder_id.eq_any(descendant_ids));
        }
        (Some(folder_id), false) => {
            docs_query = docs_query.filter(documents::folder_id.eq(Some(folder_id)));
        }
        (None, false) => {
            docs_query = docs_query.filter(documents::folder_id.is_null());
        }
        (None, true) => {}
    }

    if let Some(tags_param) = tags_param.as_ref() {
        let tag_ids: Result<Vec<Uuid>, _> = tags_param
            .split(',')
            .map(|s| Uuid::parse_str(s.trim()))
            .collect();
        let tag_ids = tag_ids.map_err(|_| AppError::bad_request("tags must be a list of UUIDs"))?;

        if !tag_ids.is_empty() {
            // Documents carrying every requested tag.
            let mut matching: Option<Vec<Uuid>> = None;
            for tag_id in &tag_ids {
                let docs_for_tag: Vec<Uuid> = document_tags::table
                    .filter(document_tags::tag_id.eq(*tag_id))
                    .select(document_tags::document_id)
                    .load(&mut conn)?;
                matching = Some(match matching {
                    Some(existing) => existing
                        .into_iter()
                        .filter(|id| docs_for_tag.contains(id))
                        .collect(),
                    None => docs_for_tag,
                });
                if matching.as_ref().map(Vec::is_empty).unwrap_or(false) {
                    return Ok(Json(vec![]));
                }
            }

            if let Some(ids) = matching {
                docs_query = docs_query.filter(documents::id.eq_any(ids));
            }
        }
    }

    let docs: Vec<Document> = docs_query
        .order(documents::uploaded_at.desc())
        .load(&mut conn)?;

    let docs = filter_visible_documents(&mut conn, &user, docs)?;

    let doc_ids: Vec<Uuid> = docs.iter().map(|doc| doc.id).collect();
    let tags_map = load_tags_for_documents(&mut conn, &doc_ids)?;
    let mut versions = load_current_versions(&mut conn, &docs)?;
    drop(conn);

    let mut response = Vec::with_capacity(doc_ids.len());
    for doc in docs {
        let tags = tags_map.get(&doc.id).cloned();
        let current_version = versions.remove(&doc.id);
        response.push(to_document_response(
            &state,
            user.user_id,
            doc,
            tags,
            current_version,
        )?);
    }

    Ok(Json(response))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<DocumentDetailResponse>> {
    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Viewer)?;

    let current_version: DocumentVersion = document_versions::table
        .find(doc.current_version_id)
        .first(&mut conn)?;

    let tags_map = load_tags_for_documents(&mut conn, &[document_id])?;
    drop(conn);

    Ok(Json(DocumentDetailResponse {
        document: to_document_response(
            &state,
            user.user_id,
            doc,
            tags_map.get(&document_id).cloned(),
            Some(to_version_response(current_version)),
        )?,
    }))
}

pub async fn get_document_access(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<DocumentAccessResponse>> {
    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }

    let level = access::effective_document_access(&mut conn, &user, &doc)?
        .ok_or_else(AppError::not_found)?;

    Ok(Json(DocumentAccessResponse {
        document_id,
        access_level: level.as_str().to_string(),
    }))
}

pub async fn upload_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: ClientMeta,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentDetailResponse>)> {
    let request = read_upload_multipart(multipart).await?;
    let original_name_for_log = request.original_name.clone();

    let outcome = match process_upload(&state, request, &user, &meta).await {
        Ok(outcome) => {
            info!(
                document_id = %outcome.detail.document.id,
                original_name = %outcome.detail.document.original_name,
                created = outcome.created,
                reused_existing = !outcome.created,
                "document upload succeeded"
            );
            outcome
        }
        Err(err) => {
            error!(error = ?err, original_name = %original_name_for_log, "document upload failed");
            return Err(err);
        }
    };

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(outcome.detail)))
}

pub async fn upload_document_version(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: ClientMeta,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentDetailResponse>)> {
    let request = read_upload_multipart(multipart).await?;

    let mut conn = state.db()?;
    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Editor)?;

    let checksum_hex = hex::encode(Sha256::digest(&request.bytes));
    let size_bytes = request.bytes.len() as i64;

    let current: DocumentVersion = document_versions::table
        .find(doc.current_version_id)
        .first(&mut conn)?;
    if current.checksum == checksum_hex {
        return Err(AppError::conflict(
            "uploaded content is identical to the current version",
        ));
    }

    let latest_number: Option<i32> = document_versions::table
        .filter(document_versions::document_id.eq(document_id))
        .select(diesel::dsl::max(document_versions::version_number))
        .first(&mut conn)?;
    let version_number = latest_number.unwrap_or(0) + 1;

    let version_id = Uuid::new_v4();
    let object_key = format!("documents/{document_id}/v{version_number}/{version_id}");
    drop(conn);

    let content_disposition = inline_content_disposition(&request.original_name);
    state
        .storage
        .put_object(
            &object_key,
            request.bytes.clone(),
            request.content_type.clone(),
            content_disposition,
        )
        .await
        .map_err(|err| {
            error!(error = %err, key = %object_key, "failed to store document version");
            AppError::internal(format!("failed to store document version: {err}"))
        })?;

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let (document, version) = conn.transaction(|conn| {
        let new_version = NewDocumentVersion {
            id: version_id,
            document_id,
            version_number,
            object_key: object_key.clone(),
            storage_backend: state.storage.backend_name().to_string(),
            size_bytes,
            checksum: checksum_hex.clone(),
            created_by: user.user_id,
            metadata: Value::Object(Default::default()),
        };
        diesel::insert_into(document_versions::table)
            .values(&new_version)
            .execute(conn)?;

        diesel::update(documents::table.find(document_id))
            .set((
                documents::current_version_id.eq(version_id),
                documents::original_name.eq(&request.original_name),
                documents::content_type.eq(&request.content_type),
                documents::updated_at.eq(now),
            ))
            .execute(conn)?;

        let document: Document = documents::table.find(document_id).first(conn)?;
        let version: DocumentVersion = document_versions::table.find(version_id).first(conn)?;
        Ok::<_, diesel::result::Error>((document, version))
    })?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_VERSION_UPLOAD,
        Some(document_id),
        json!({ "version_number": version_number, "checksum": checksum_hex }),
        &meta,
    );

    let tags_map = load_tags_for_documents(&mut conn, &[document_id])?;
    drop(conn);

    Ok((
        StatusCode::CREATED,
        Json(DocumentDetailResponse {
            document: to_document_response(
                &state,
                user.user_id,
                document,
                tags_map.get(&document_id).cloned(),
                Some(to_version_response(version)),
            )?,
        }),
    ))
}

pub async fn list_document_versions(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DocumentVersionResponse>>> {
    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Viewer)?;

    let versions: Vec<DocumentVersion> = document_versions::table
        .filter(document_versions::document_id.eq(document_id))
        .order(document_versions::version_number.desc())
        .load(&mut conn)?;

    Ok(Json(
        versions.into_iter().map(to_version_response).collect(),
    ))
}

/// Restoring an old version creates a fresh version row pointing at the
/// old stored object rather than rewriting history.
pub async fn restore_document_version(
    State(state): State<AppState>,
    Path((document_id, version_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    meta: ClientMeta,
) -> AppResult<(StatusCode, Json<DocumentDetailResponse>)> {
    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Editor)?;

    let source: DocumentVersion = document_versions::table.find(version_id).first(&mut conn)?;
    if source.document_id != document_id {
        return Err(AppError::not_found());
    }
    if source.id == doc.current_version_id {
        return Err(AppError::bad_request("version is already current"));
    }

    let latest_number: Option<i32> = document_versions::table
        .filter(document_versions::document_id.eq(document_id))
        .select(diesel::dsl::max(document_versions::version_number))
        .first(&mut conn)?;
    let version_number = latest_number.unwrap_or(0) + 1;

    let new_version_id = Uuid::new_v4();
    let now = Utc::now().naive_utc();

    let (document, version) = conn.transaction(|conn| {
        let new_version = NewDocumentVersion {
            id: new_version_id,
            document_id,
            version_number,
            object_key: source.object_key.clone(),
            storage_backend: source.storage_backend.clone(),
            size_bytes: source.size_bytes,
            checksum: source.checksum.clone(),
            created_by: user.user_id,
            metadata: json!({ "restored_from": source.id }),
        };
        diesel::insert_into(document_versions::table)
            .values(&new_version)
            .execute(conn)?;

        diesel::update(documents::table.find(document_id))
            .set((
                documents::current_version_id.eq(new_version_id),
                documents::updated_at.eq(now),
            ))
            .execute(conn)?;

        let document: Document = documents::table.find(document_id).first(conn)?;
        let version: DocumentVersion =
            document_versions::table.find(new_version_id).first(conn)?;
        Ok::<_, diesel::result::Error>((document, version))
    })?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_VERSION_RESTORE,
        Some(document_id),
        json!({ "restored_from": source.id, "new_version_number": version_number }),
        &meta,
    );

    let tags_map = load_tags_for_documents(&mut conn, &[document_id])?;
    drop(conn);

    Ok((
        StatusCode::CREATED,
        Json(DocumentDetailResponse {
            document: to_document_response(
                &state,
                user.user_id,
                document,
                tags_map.get(&document_id).cloned(),
                Some(to_version_response(version)),
            )?,
        }),
    ))
}

pub async fn download_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: ClientMeta,
) -> AppResult<Response> {
    let mut conn = state.db()?;
    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Viewer)?;

    let version: DocumentVersion = document_versions::table
        .find(doc.current_version_id)
        .first(&mut conn)?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_DOCUMENT_DOWNLOAD,
        Some(document_id),
        json!({ "version_number": version.version_number }),
        &meta,
    );
    drop(conn);

    serve_version(&state, &doc, &version).await
}

/// Short-lived tokened download path, usable without an Authorization
/// header (browser navigations). The token holder must still have a
/// live session.
pub async fn download_with_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Response> {
    let claims = state
        .jwt
        .verify_download_token(&token)
        .map_err(|_| AppError::unauthorized())?;

    let mut conn = state.db()?;

    let doc: Document = documents::table.find(claims.doc_id).first(&mut conn)?;
    if doc.deleted_at.is_some() {
        return Err(AppError::not_found());
    }

    let version: DocumentVersion = document_versions::table
        .find(doc.current_version_id)
        .first(&mut conn)?;

    let now = Utc::now().naive_utc();
    let has_active_refresh: bool = select(exists(
        refresh_dsl::refresh_tokens
            .filter(refresh_dsl::user_id.eq(claims.user_id))
            .filter(refresh_dsl::revoked_at.is_null())
            .filter(refresh_dsl::expires_at.gt(now)),
    ))
    .get_result(&mut conn)?;

    if !has_active_refresh {
        return Err(AppError::unauthorized());
    }

    drop(conn);

    if state.storage.supports_presigned_urls() {
        let presigned_url = state
            .storage
            .presign_get_object(
                &version.object_key,
                Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS),
            )
            .await
            .map_err(|err| AppError::internal(format!("failed to generate download URL: {err}")))?;
        Ok(axum::response::Redirect::temporary(&presigned_url).into_response())
    } else {
        stream_version(&state, &doc, &version).await
    }
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: ClientMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Editor)?;

    let now = Utc::now().naive_utc();
    diesel::update(documents::table.find(document_id))
        .set((
            documents::deleted_at.eq(Some(now)),
            documents::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_DOCUMENT_DELETE,
        Some(document_id),
        json!({}),
        &meta,
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn restore_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: ClientMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Owner)?;
    if doc.deleted_at.is_none() {
        return Err(AppError::bad_request("document is not deleted"));
    }

    let now = Utc::now().naive_utc();
    diesel::update(documents::table.find(document_id))
        .set((
            documents::deleted_at.eq(None::<NaiveDateTime>),
            documents::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_DOCUMENT_RESTORE,
        Some(document_id),
        json!({}),
        &meta,
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: ClientMeta,
    Json(payload): Json<UpdateDocumentRequest>,
) -> AppResult<Json<DocumentDetailResponse>> {
    let mut conn = state.db()?;

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    if document.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &document, AccessLevel::Editor)?;

    let new_title = match payload.title {
        Some(ref title) => {
            let trimmed = title.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("title must not be empty"));
            }
            Some(trimmed.to_string())
        }
        None => None,
    };

    let expires_patch = parse_expires_patch(payload.expires_at.as_ref())?;

    if new_title.is_none() && payload.metadata.is_none() && expires_patch.is_none() {
        return Err(AppError::bad_request("no changes provided"));
    }

    let now = Utc::now().naive_utc();
    let mut changed_fields: Vec<&str> = Vec::new();

    if let Some(title) = new_title {
        let new_filename = filename_with_retained_extension(&title, &document.filename);
        diesel::update(documents::table.find(document_id))
            .set((
                documents::title.eq(&title),
                documents::filename.eq(&new_filename),
                documents::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        changed_fields.push("title");
    }

    if let Some(metadata) = payload.metadata {
        if !metadata.is_object() {
            return Err(AppError::bad_request("metadata must be a JSON object"));
        }
        diesel::update(documents::table.find(document_id))
            .set((
                documents::metadata.eq(metadata),
                documents::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        changed_fields.push("metadata");
    }

    if let Some(expires_at) = expires_patch {
        diesel::update(documents::table.find(document_id))
            .set((
                documents::expires_at.eq(expires_at),
                documents::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        changed_fields.push("expires_at");
    }

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_DOCUMENT_UPDATE,
        Some(document_id),
        json!({ "fields": changed_fields }),
        &meta,
    );

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    let current_version: DocumentVersion = document_versions::table
        .find(document.current_version_id)
        .first(&mut conn)?;
    let tags_map = load_tags_for_documents(&mut conn, &[document_id])?;
    drop(conn);

    Ok(Json(DocumentDetailResponse {
        document: to_document_response(
            &state,
            user.user_id,
            document,
            tags_map.get(&document_id).cloned(),
            Some(to_version_response(current_version)),
        )?,
    }))
}

pub async fn move_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<MoveDocumentRequest>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;

    if let Some(folder_id) = payload.folder_id {
        require_target_folder(&mut conn, &user, folder_id)?;
    }

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Editor)?;

    let now = Utc::now().naive_utc();
    diesel::update(documents::table.find(document_id))
        .set((
            documents::folder_id.eq(payload.folder_id),
            documents::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_move_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<BulkMoveRequest>,
) -> AppResult<(StatusCode, Json<BulkMoveResponse>)> {
    let BulkMoveRequest {
        mut document_ids,
        folder_id,
    } = payload;

    if document_ids.is_empty() {
        return Err(AppError::bad_request("document_ids must not be empty"));
    }

    document_ids.sort();
    document_ids.dedup();

    let mut conn = state.db()?;

    if let Some(target_folder) = folder_id {
        require_target_folder(&mut conn, &user, target_folder)?;
    }

    let existing: Vec<Document> = documents::table
        .filter(documents::id.eq_any(&document_ids))
        .load(&mut conn)?;

    if existing.len() != document_ids.len() {
        return Err(AppError::bad_request(
            "one or more documents do not exist or are inaccessible",
        ));
    }

    if existing.iter().any(|doc| doc.deleted_at.is_some()) {
        return Err(AppError::bad_request("cannot move deleted documents"));
    }

    for doc in &existing {
        access::require_document_access(&mut conn, &user, doc, AccessLevel::Editor)?;
    }

    let now = Utc::now().naive_utc();
    let updated = diesel::update(documents::table.filter(documents::id.eq_any(&document_ids)))
        .set((
            documents::folder_id.eq(folder_id),
            documents::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    Ok((StatusCode::OK, Json(BulkMoveResponse { updated })))
}

pub async fn assign_tags(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<AssignTagsRequest>,
) -> AppResult<impl IntoResponse> {
    let mut tag_ids = payload.tag_ids;
    if tag_ids.is_empty() {
        return Err(AppError::bad_request("tag_ids must not be empty"));
    }
    tag_ids.sort();
    tag_ids.dedup();

    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Editor)?;

    let existing_tags: Vec<Tag> = tags::table
        .filter(tags::id.eq_any(&tag_ids))
        .load(&mut conn)?;
    if existing_tags.len() != tag_ids.len() {
        return Err(AppError::bad_request("one or more tags do not exist"));
    }

    let rows: Vec<NewDocumentTag> = tag_ids
        .iter()
        .map(|tag_id| NewDocumentTag {
            document_id,
            tag_id: *tag_id,
            assigned_by: Some(user.user_id),
        })
        .collect();

    diesel::insert_into(document_tags::table)
        .values(&rows)
        .on_conflict_do_nothing()
        .execute(&mut conn)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_tag(
    State(state): State<AppState>,
    Path((document_id, tag_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Editor)?;

    diesel::delete(
        document_tags::table
            .filter(document_tags::document_id.eq(document_id))
            .filter(document_tags::tag_id.eq(tag_id)),
    )
    .execute(&mut conn)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_update_tags(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<BulkTagRequest>,
) -> AppResult<(StatusCode, Json<BulkTagResponse>)> {
    let BulkTagRequest {
        mut document_ids,
        mut tag_ids,
        action,
    } = payload;

    if document_ids.is_empty() {
        return Err(AppError::bad_request("document_ids must not be empty"));
    }
    if tag_ids.is_empty() {
        return Err(AppError::bad_request("tag_ids must not be empty"));
    }

    document_ids.sort();
    document_ids.dedup();
    tag_ids.sort();
    tag_ids.dedup();

    let mut conn = state.db()?;

    let docs: Vec<Document> = documents::table
        .filter(documents::id.eq_any(&document_ids))
        .load(&mut conn)?;

    if docs.len() != document_ids.len() {
        return Err(AppError::bad_request(
            "one or more documents do not exist or are inaccessible",
        ));
    }

    if docs.iter().any(|doc| doc.deleted_at.is_some()) {
        return Err(AppError::bad_request(
            "cannot assign or remove tags from deleted documents",
        ));
    }

    for doc in &docs {
        access::require_document_access(&mut conn, &user, doc, AccessLevel::Editor)?;
    }

    let existing_tags: Vec<Tag> = tags::table
        .filter(tags::id.eq_any(&tag_ids))
        .load(&mut conn)?;
    if existing_tags.len() != tag_ids.len() {
        return Err(AppError::bad_request("one or more tags do not exist"));
    }

    let response = match action {
        BulkTagAction::Add => {
            let mut inserts = Vec::with_capacity(document_ids.len() * tag_ids.len());
            for doc_id in &document_ids {
                for tag_id in &tag_ids {
                    inserts.push(NewDocumentTag {
                        document_id: *doc_id,
                        tag_id: *tag_id,
                        assigned_by: Some(user.user_id),
                    });
                }
            }

            let added = diesel::insert_into(document_tags::table)
                .values(&inserts)
                .on_conflict_do_nothing()
                .execute(&mut conn)?;

            BulkTagResponse { added, removed: 0 }
        }
        BulkTagAction::Remove => {
            let removed = diesel::delete(
                document_tags::table
                    .filter(document_tags::document_id.eq_any(&document_ids))
                    .filter(document_tags::tag_id.eq_any(&tag_ids)),
            )
            .execute(&mut conn)?;

            BulkTagResponse { added: 0, removed }
        }
    };

    Ok((StatusCode::OK, Json(response)))
}

async fn read_upload_multipart(mut multipart: Multipart) -> AppResult<UploadRequest> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut folder_id: Option<Uuid> = None;
    let mut title: Option<String> = None;
    let mut metadata: Value = Value::Object(Default::default());
    let mut expires_at: Option<NaiveDateTime> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        let msg = format!("invalid multipart data: {err}");
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(msg)
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().map(|n| n.to_string());
                original_name = file_name.clone();
                content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    let msg = format!("failed to read file bytes: {err}");
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(msg)
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("folder_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid folder id: {err}")))?;
                if !value.trim().is_empty() {
                    let parsed = Uuid::parse_str(value.trim())
                        .map_err(|_| AppError::bad_request("folder_id must be a valid UUID"))?;
                    folder_id = Some(parsed);
                }
            }
            Some("title") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid title: {err}")))?;
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    title = Some(trimmed.to_string());
                }
            }
            Some("metadata") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid metadata: {err}")))?;
                metadata = serde_json::from_str(&value).map_err(|err| {
                    AppError::bad_request(format!("metadata must be valid JSON: {err}"))
                })?;
            }
            Some("expires_at") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid expires_at: {err}")))?;
                if !value.trim().is_empty() {
                    expires_at = Some(parse_rfc3339(value.trim())?);
                }
            }
            _ => {}
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| {
        error!("upload rejected: missing file field");
        AppError::bad_request("file field is required")
    })?;

    if file_bytes.is_empty() {
        error!("upload rejected: empty file payload");
        return Err(AppError::bad_request("file field must not be empty"));
    }
    let original_name = original_name.ok_or_else(|| {
        error!("upload rejected: missing original filename");
        AppError::bad_request("filename is required")
    })?;

    Ok(UploadRequest {
        bytes: file_bytes,
        original_name,
        content_type,
        folder_id,
        title,
        metadata,
        expires_at,
    })
}

async fn process_upload(
    state: &AppState,
    request: UploadRequest,
    user: &AuthenticatedUser,
    meta: &ClientMeta,
) -> AppResult<UploadOutcome> {
    let UploadRequest {
        bytes,
        original_name,
        content_type,
        folder_id,
        title,
        metadata,
        expires_at,
    } = request;

    let doc_id = Uuid::new_v4();
    let version_id = Uuid::new_v4();
    let version_number = 1;
    let stored_filename = original_name.clone();

    let checksum = Sha256::digest(&bytes);
    let checksum_hex = hex::encode(checksum);
    let size_bytes = bytes.len() as i64;
    let object_key = format!("documents/{doc_id}/v{version_number}/{version_id}");

    {
        let mut conn = state.db()?;

        if let Some(folder) = folder_id {
            require_target_folder(&mut conn, user, folder)?;
        }

        // Dedup against current versions, but only those the uploader can
        // already reach; matching someone else's private document must not
        // leak it. A hit on a soft-deleted document restores it instead of
        // storing a second copy.
        let candidates: Vec<(Document, DocumentVersion)> = documents::table
            .inner_join(
                document_versions::table
                    .on(document_versions::id.eq(documents::current_version_id)),
            )
            .filter(document_versions::checksum.eq(&checksum_hex))
            .select((documents::all_columns, document_versions::all_columns))
            .load(&mut conn)?;

        let mut existing = None;
        for (document, version) in candidates {
            let visible = user.is_admin()
                || access::effective_document_access(&mut conn, user, &document)?.is_some();
            if visible {
                existing = Some((document, version));
                break;
            }
        }

        if let Some((mut document, version)) = existing {
            if document.deleted_at.is_some() {
                let now = Utc::now().naive_utc();
                diesel::update(documents::table.find(document.id))
                    .set((
                        documents::deleted_at.eq(None::<NaiveDateTime>),
                        documents::updated_at.eq(now),
                    ))
                    .execute(&mut conn)?;
                document.deleted_at = None;
                document.updated_at = now;
            }

            let tags_map = load_tags_for_documents(&mut conn, &[document.id])?;
            let tags = tags_map.get(&document.id).cloned();

            info!(
                document_id = %document.id,
                checksum = %checksum_hex,
                "upload deduplicated existing document"
            );

            return Ok(UploadOutcome {
                detail: DocumentDetailResponse {
                    document: to_document_response(
                        state,
                        user.user_id,
                        document,
                        tags,
                        Some(to_version_response(version)),
                    )?,
                },
                created: false,
            });
        }
    }

    let content_disposition = inline_content_disposition(&original_name);

    state
        .storage
        .put_object(
            &object_key,
            bytes.clone(),
            content_type.clone(),
            content_disposition.clone(),
        )
        .await
        .map_err(|err| {
            error!(error = %err, key = %object_key, "failed to store document");
            AppError::internal(format!("failed to store document: {err}"))
        })?;

    let metadata_value = if metadata.is_null() {
        Value::Object(Default::default())
    } else {
        metadata
    };

    let (document, version) = {
        let mut conn = state.db()?;
        conn.transaction(|conn| {
            let new_document = NewDocument {
                id: doc_id,
                title: title.unwrap_or_else(|| derive_document_title(&original_name)),
                filename: stored_filename.clone(),
                original_name: original_name.clone(),
                content_type: content_type.clone(),
                folder_id,
                created_by: user.user_id,
                current_version_id: version_id,
                metadata: metadata_value.clone(),
                expires_at,
                organization_id: user.organization_id,
            };
            diesel::insert_into(documents::table)
                .values(&new_document)
                .execute(conn)?;

            let new_version = NewDocumentVersion {
                id: version_id,
                document_id: doc_id,
                version_number,
                object_key: object_key.clone(),
                storage_backend: state.storage.backend_name().to_string(),
                size_bytes,
                checksum: checksum_hex.clone(),
                created_by: user.user_id,
                metadata: Value::Object(Default::default()),
            };

            diesel::insert_into(document_versions::table)
                .values(&new_version)
                .execute(conn)?;

            let document: Document = documents::table.find(doc_id).first(conn)?;
            let version: DocumentVersion = document_versions::table.find(version_id).first(conn)?;

            Ok::<_, diesel::result::Error>((document, version))
        })?
    };

    if let Ok(mut conn) = state.db() {
        audit::record(
            &mut conn,
            Some(user.user_id),
            audit::ACTION_DOCUMENT_UPLOAD,
            Some(doc_id),
            json!({ "original_name": original_name, "checksum": checksum_hex }),
            meta,
        );
    } else {
        warn!(document_id = %doc_id, "skipped audit entry due to pool error");
    }

    let detail = DocumentDetailResponse {
        document: to_document_response(
            state,
            user.user_id,
            document,
            None,
            Some(to_version_response(version)),
        )?,
    };

    Ok(UploadOutcome {
        detail,
        created: true,
    })
}

pub(crate) async fn serve_version(
    state: &AppState,
    doc: &Document,
    version: &DocumentVersion,
) -> AppResult<Response> {
    if state.storage.supports_presigned_urls() {
        let presigned_url = state
            .storage
            .presign_get_object(
                &version.object_key,
                Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS),
            )
            .await
            .map_err(|err| AppError::internal(format!("failed to generate download URL: {err}")))?;

        Ok(Json(DocumentDownloadResponse {
            url: presigned_url,
            expires_in: PRESIGNED_URL_EXPIRY_SECONDS,
            filename: doc.original_name.clone(),
            content_type: doc.content_type.clone(),
            size_bytes: version.size_bytes,
        })
        .into_response())
    } else {
        stream_version(state, doc, version).await
    }
}

async fn stream_version(
    state: &AppState,
    doc: &Document,
    version: &DocumentVersion,
) -> AppResult<Response> {
    let bytes = state
        .storage
        .get_object(&version.object_key)
        .await
        .map_err(|err| AppError::internal(format!("failed to read stored object: {err}")))?;

    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(content_type) = &doc.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    if let Some(disposition) = inline_content_disposition(&doc.original_name) {
        builder = builder.header(header::CONTENT_DISPOSITION, disposition);
    }

    builder
        .body(axum::body::Body::from(bytes))
        .map_err(|err| AppError::internal(format!("failed to build download response: {err}")))
}

/// Placing a document in a folder requires editor access on that folder,
/// same as creating a subfolder there.
fn require_target_folder(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    folder_id: Uuid,
) -> AppResult<()> {
    let folder: Option<Folder> = folders::table.find(folder_id).first(conn).optional()?;
    let folder = folder.ok_or_else(|| AppError::bad_request("folder does not exist"))?;
    super::folders::require_folder_access(conn, user, &folder, AccessLevel::Editor)?;
    Ok(())
}

pub(crate) fn filter_visible_documents(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    docs: Vec<Document>,
) -> AppResult<Vec<Document>> {
    if user.is_admin() {
        return Ok(docs);
    }

    let mut visible = Vec::with_capacity(docs.len());
    for doc in docs {
        if access::effective_document_access(conn, user, &doc)?.is_some() {
            visible.push(doc);
        }
    }
    Ok(visible)
}

pub(crate) fn load_tags_for_documents(
    conn: &mut PgConnection,
    document_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, Vec<Tag>>> {
    if document_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(Uuid, Tag)> = document_tags::table
        .inner_join(tags::table)
        .filter(document_tags::document_id.eq_any(document_ids))
        .select((document_tags::document_id, tags::all_columns))
        .load(conn)?;

    let mut map: HashMap<Uuid, Vec<Tag>> = HashMap::new();
    for (doc_id, tag) in rows {
        map.entry(doc_id).or_default().push(tag);
    }
    Ok(map)
}

fn load_current_versions(
    conn: &mut PgConnection,
    docs: &[Document],
) -> AppResult<HashMap<Uuid, DocumentVersionResponse>> {
    if docs.is_empty() {
        return Ok(HashMap::new());
    }

    let mut version_ids: Vec<Uuid> = docs.iter().map(|doc| doc.current_version_id).collect();
    version_ids.sort();
    version_ids.dedup();

    let versions: Vec<DocumentVersion> = document_versions::table
        .filter(document_versions::id.eq_any(&version_ids))
        .load(conn)?;

    let mut by_version: HashMap<Uuid, DocumentVersion> =
        versions.into_iter().map(|v| (v.id, v)).collect();

    let mut result = HashMap::with_capacity(docs.len());
    for doc in docs {
        if let Some(version) = by_version.remove(&doc.current_version_id) {
            result.insert(doc.id, to_version_response(version));
        }
    }

    Ok(result)
}

pub(crate) fn to_document_response(
    state: &AppState,
    user_id: Uuid,
    doc: Document,
    tags: Option<Vec<Tag>>,
    current_version: Option<DocumentVersionResponse>,
) -> AppResult<DocumentResponse> {
    let current_version = if let Some(version) = current_version {
        let download_path = build_download_path(state, doc.id, user_id)?;
        Some(DocumentCurrentVersionResponse {
            version,
            download_path,
        })
    } else {
        None
    };

    Ok(DocumentResponse {
        id: doc.id,
        title: doc.title,
        filename: doc.filename,
        original_name: doc.original_name,
        content_type: doc.content_type,
        folder_id: doc.folder_id,
        created_by: doc.created_by,
        organization_id: doc.organization_id,
        uploaded_at: to_iso(doc.uploaded_at),
        updated_at: to_iso(doc.updated_at),
        deleted_at: doc.deleted_at.map(to_iso),
        expires_at: doc.expires_at.map(to_iso),
        metadata: doc.metadata,
        tags: tags
            .unwrap_or_default()
            .into_iter()
            .map(TagResponse::from)
            .collect(),
        current_version,
    })
}

fn build_download_path(state: &AppState, document_id: Uuid, user_id: Uuid) -> AppResult<String> {
    state
        .jwt
        .generate_download_token(document_id, user_id)
        .map(|token| format!("/download/{token}"))
        .map_err(|err| AppError::internal(format!("failed to generate download token: {err}")))
}

fn to_version_response(version: DocumentVersion) -> DocumentVersionResponse {
    DocumentVersionResponse {
        id: version.id,
        version_number: version.version_number,
        storage_backend: version.storage_backend,
        size_bytes: version.size_bytes,
        checksum: version.checksum,
        created_by: version.created_by,
        created_at: to_iso(version.created_at),
        metadata: version.metadata,
    }
}

fn derive_document_title(original: &str) -> String {
    let trimmed = original.trim();
    if trimmed.is_empty() {
        return "Document".to_string();
    }

    let stem = FsPath::new(trimmed)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    stem.unwrap_or_else(|| trimmed.to_string())
}

fn filename_with_retained_extension(title: &str, current_filename: &str) -> String {
    let extension = FsPath::new(current_filename)
        .extension()
        .and_then(|ext| ext.to_str());

    if let Some(ext) = extension {
        if title
            .rsplit_once('.')
            .map(|(_, existing_ext)| existing_ext.eq_ignore_ascii_case(ext))
            .unwrap_or(false)
        {
            title.to_string()
        } else {
            format!("{title}.{ext}")
        }
    } else {
        title.to_string()
    }
}

fn parse_rfc3339(value: &str) -> AppResult<NaiveDateTime> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
        .map_err(|_| AppError::bad_request("timestamps must be RFC 3339"))
}

/// `expires_at` PATCH semantics: omitted leaves the value alone, `null`
/// clears it, a string sets it.
fn parse_expires_patch(value: Option<&Value>) -> AppResult<Option<Option<NaiveDateTime>>> {
    match value {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(s)) => Ok(Some(Some(parse_rfc3339(s)?))),
        Some(_) => Err(AppError::bad_request("expires_at must be a string or null")),
    }
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::{derive_document_title, filename_with_retained_extension, parse_expires_patch};
    use serde_json::json;

    #[test]
    fn title_derivation_strips_extension() {
        assert_eq!(derive_document_title("contract.pdf"), "contract");
        assert_eq!(derive_document_title("  notes  "), "notes");
        assert_eq!(derive_document_title(""), "Document");
    }

    #[test]
    fn renaming_keeps_the_extension() {
        assert_eq!(
            filename_with_retained_extension("new title", "old.pdf"),
            "new title.pdf"
        );
        assert_eq!(
            filename_with_retained_extension("report.PDF", "old.pdf"),
            "report.PDF"
        );
        assert_eq!(filename_with_retained_extension("plain", "old"), "plain");
    }

    #[test]
    fn expires_patch_distinguishes_null_from_omitted() {
        assert!(parse_expires_patch(None).unwrap().is_none());
        assert_eq!(parse_expires_patch(Some(&json!(null))).unwrap(), Some(None));
        assert!(parse_expires_patch(Some(&json!("2026-01-01T00:00:00Z")))
            .unwrap()
            .flatten()
            .is_some());
        assert!(parse_expires_patch(Some(&json!(12))).is_err());
    }
}
