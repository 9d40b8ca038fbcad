use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::access::{self, AccessLevel, Role};
use crate::audit::{self, ClientMeta};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{
    Document, DocumentPermission, Folder, FolderPermission, NewDocumentPermission,
    NewFolderPermission,
};
use crate::schema::{document_permissions, documents, folder_permissions, folders, groups, users};
use crate::state::AppState;

use super::documents::to_iso;

#[derive(Deserialize)]
pub struct GrantRequest {
    pub user_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub role: Option<String>,
    pub access_level: String,
    pub expires_at: Option<String>,
    #[serde(default)]
    pub inherit_to_children: Option<bool>,
}

#[derive(Serialize)]
pub struct PermissionResponse {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub role: Option<String>,
    pub access_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherit_to_children: Option<bool>,
    pub granted_by: Uuid,
    pub expires_at: Option<String>,
    pub revoked_at: Option<String>,
    pub created_at: String,
}

impl From<DocumentPermission> for PermissionResponse {
    fn from(p: DocumentPermission) -> Self {
        Self {
            id: p.id,
            user_id: p.user_id,
            group_id: p.group_id,
            role: p.role,
            access_level: p.access_level,
            inherit_to_children: None,
            granted_by: p.granted_by,
            expires_at: p.expires_at.map(to_iso),
            revoked_at: p.revoked_at.map(to_iso),
            created_at: to_iso(p.created_at),
        }
    }
}

impl From<FolderPermission> for PermissionResponse {
    fn from(p: FolderPermission) -> Self {
        Self {
            id: p.id,
            user_id: p.user_id,
            group_id: p.group_id,
            role: p.role,
            access_level: p.access_level,
            inherit_to_children: Some(p.inherit_to_children),
            granted_by: p.granted_by,
            expires_at: p.expires_at.map(to_iso),
            revoked_at: p.revoked_at.map(to_iso),
            created_at: to_iso(p.created_at),
        }
    }
}

struct ValidatedGrant {
    user_id: Option<Uuid>,
    group_id: Option<Uuid>,
    role: Option<String>,
    access_level: AccessLevel,
    expires_at: Option<NaiveDateTime>,
}

fn validate_grant(conn: &mut PgConnection, payload: &GrantRequest) -> AppResult<ValidatedGrant> {
    let target_count = usize::from(payload.user_id.is_some())
        + usize::from(payload.group_id.is_some())
        + usize::from(payload.role.is_some());
    if target_count != 1 {
        return Err(AppError::bad_request(
            "grant must target exactly one of user_id, group_id or role",
        ));
    }

    let access_level = AccessLevel::parse(&payload.access_level).ok_or_else(|| {
        AppError::bad_request("access_level must be one of viewer, commenter, editor, owner")
    })?;

    if let Some(user_id) = payload.user_id {
        users::table
            .find(user_id)
            .select(users::id)
            .first::<Uuid>(conn)
            .optional()?
            .ok_or_else(|| AppError::bad_request("user does not exist"))?;
    }
    if let Some(group_id) = payload.group_id {
        groups::table
            .find(group_id)
            .select(groups::id)
            .first::<Uuid>(conn)
            .optional()?
            .ok_or_else(|| AppError::bad_request("group does not exist"))?;
    }
    if let Some(role) = payload.role.as_deref() {
        if Role::parse(role).is_none() {
            return Err(AppError::bad_request(
                "role must be one of admin, manager, user, viewer",
            ));
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

    Ok(ValidatedGrant {
        user_id: payload.user_id,
        group_id: payload.group_id,
        role: payload.role.clone(),
        access_level,
        expires_at,
    })
}

fn load_owned_document(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    document_id: Uuid,
) -> AppResult<Document> {
    let doc: Document = documents::table.find(document_id).first(conn)?;
    if doc.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }
    access::require_document_access(conn, user, &doc, AccessLevel::Owner)?;
    Ok(doc)
}

fn load_owned_folder(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    folder_id: Uuid,
) -> AppResult<Folder> {
    let folder: Folder = folders::table.find(folder_id).first(conn)?;
    if folder.created_by != user.user_id && !user.is_admin() {
        match access::effective_folder_access(conn, user, &folder)? {
            Some(level) if level >= AccessLevel::Owner => {}
            Some(_) => return Err(AppError::forbidden("owner access required")),
            None => return Err(AppError::not_found()),
        }
    }
    Ok(folder)
}

pub async fn grant_document_permission(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: ClientMeta,
    Json(payload): Json<GrantRequest>,
) -> AppResult<(StatusCode, Json<PermissionResponse>)> {
    let mut conn = state.db()?;
    load_owned_document(&mut conn, &user, document_id)?;
    let grant = validate_grant(&mut conn, &payload)?;

    // Re-granting the same target at the same level is idempotent.
    let existing: Option<DocumentPermission> = document_permissions::table
        .filter(document_permissions::document_id.eq(document_id))
        .filter(document_permissions::user_id.is_not_distinct_from(grant.user_id))
        .filter(document_permissions::group_id.is_not_distinct_from(grant.group_id))
        .filter(document_permissions::role.is_not_distinct_from(grant.role.clone()))
        .filter(document_permissions::access_level.eq(grant.access_level.as_str()))
        .filter(document_permissions::revoked_at.is_null())
        .first(&mut conn)
        .optional()?;

    if let Some(existing) = existing {
        return Ok((StatusCode::OK, Json(PermissionResponse::from(existing))));
    }

    let new_permission = NewDocumentPermission {
        id: Uuid::new_v4(),
        document_id,
        user_id: grant.user_id,
        group_id: grant.group_id,
        role: grant.role,
        access_level: grant.access_level.as_str().to_string(),
        granted_by: user.user_id,
        expires_at: grant.expires_at,
    };

    diesel::insert_into(document_permissions::table)
        .values(&new_permission)
        .execute(&mut conn)?;

    let created: DocumentPermission = document_permissions::table
        .find(new_permission.id)
        .first(&mut conn)?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_PERMISSION_GRANT,
        Some(document_id),
        json!({ "permission_id": created.id, "access_level": created.access_level }),
        &meta,
    );

    Ok((StatusCode::CREATED, Json(PermissionResponse::from(created))))
}

pub async fn list_document_permissions(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<PermissionResponse>>> {
    let mut conn = state.db()?;
    load_owned_document(&mut conn, &user, document_id)?;

    let rows: Vec<DocumentPermission> = document_permissions::table
        .filter(document_permissions::document_id.eq(document_id))
        .order(document_permissions::created_at.asc())
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(PermissionResponse::from).collect()))
}

pub async fn revoke_document_permission(
    State(state): State<AppState>,
    Path((document_id, permission_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    meta: ClientMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    load_owned_document(&mut conn, &user, document_id)?;

    let permission: DocumentPermission = document_permissions::table
        .find(permission_id)
        .first(&mut conn)?;
    if permission.document_id != document_id {
        return Err(AppError::not_found());
    }
    if permission.revoked_at.is_some() {
        return Err(AppError::bad_request("permission is already revoked"));
    }

    let now = Utc::now().naive_utc();
    diesel::update(document_permissions::table.find(permission_id))
        .set(document_permissions::revoked_at.eq(Some(now)))
        .execute(&mut conn)?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_PERMISSION_REVOKE,
        Some(document_id),
        json!({ "permission_id": permission_id }),
        &meta,
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn grant_folder_permission(
    State(state): State<AppState>,
    Path(folder_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: ClientMeta,
    Json(payload): Json<GrantRequest>,
) -> AppResult<(StatusCode, Json<PermissionResponse>)> {
    let mut conn = state.db()?;
    load_owned_folder(&mut conn, &user, folder_id)?;
    let grant = validate_grant(&mut conn, &payload)?;
    let inherit = payload.inherit_to_children.unwrap_or(false);

    let existing: Option<FolderPermission> = folder_permissions::table
        .filter(folder_permissions::folder_id.eq(folder_id))
        .filter(folder_permissions::user_id.is_not_distinct_from(grant.user_id))
        .filter(folder_permissions::group_id.is_not_distinct_from(grant.group_id))
        .filter(folder_permissions::role.is_not_distinct_from(grant.role.clone()))
        .filter(folder_permissions::access_level.eq(grant.access_level.as_str()))
        .filter(folder_permissions::inherit_to_children.eq(inherit))
        .filter(folder_permissions::revoked_at.is_null())
        .first(&mut conn)
        .optional()?;

    if let Some(existing) = existing {
        return Ok((StatusCode::OK, Json(PermissionResponse::from(existing))));
    }

    let new_permission = NewFolderPermission {
        id: Uuid::new_v4(),
        folder_id,
        user_id: grant.user_id,
        group_id: grant.group_id,
        role: grant.role,
        access_level: grant.access_level.as_str().to_string(),
        inherit_to_children: inherit,
        granted_by: user.user_id,
        expires_at: grant.expires_at,
    };

    diesel::insert_into(folder_permissions::table)
        .values(&new_permission)
        .execute(&mut conn)?;

    let created: FolderPermission = folder_permissions::table
        .find(new_permission.id)
        .first(&mut conn)?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_PERMISSION_GRANT,
        None,
        json!({
            "permission_id": created.id,
            "folder_id": folder_id,
            "access_level": created.access_level,
            "inherit_to_children": created.inherit_to_children,
        }),
        &meta,
    );

    Ok((StatusCode::CREATED, Json(PermissionResponse::from(created))))
}

pub async fn list_folder_permissions(
    State(state): State<AppState>,
    Path(folder_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<PermissionResponse>>> {
    let mut conn = state.db()?;
    load_owned_folder(&mut conn, &user, folder_id)?;

    let rows: Vec<FolderPermission> = folder_permissions::table
        .filter(folder_permissions::folder_id.eq(folder_id))
        .order(folder_permissions::created_at.asc())
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(PermissionResponse::from).collect()))
}

pub async fn revoke_folder_permission(
    State(state): State<AppState>,
    Path((folder_id, permission_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    meta: ClientMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    load_owned_folder(&mut conn, &user, folder_id)?;

    let permission: FolderPermission = folder_permissions::table
        .find(permission_id)
        .first(&mut conn)?;
    if permission.folder_id != folder_id {
        return Err(AppError::not_found());
    }
    if permission.revoked_at.is_some() {
        return Err(AppError::bad_request("permission is already revoked"));
    }

    let now = Utc::now().naive_utc();
    diesel::update(folder_permissions::table.find(permission_id))
        .set(folder_permissions::revoked_at.eq(Some(now)))
        .execute(&mut conn)?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_PERMISSION_REVOKE,
        None,
        json!({ "permission_id": permission_id, "folder_id": folder_id }),
        &meta,
    );

    Ok(StatusCode::NO_CONTENT)
}
