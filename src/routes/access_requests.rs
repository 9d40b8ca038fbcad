use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::access::{self, AccessLevel};
use crate::audit::{self, ClientMeta};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{AccessRequest, Document, NewAccessRequest, NewDocumentPermission};
use crate::schema::{access_requests, document_permissions, documents};
use crate::state::AppState;

use super::documents::to_iso;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_DENIED: &str = "denied";

#[derive(Deserialize)]
pub struct CreateAccessRequestRequest {
    pub requested_level: String,
    pub message: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct DecideAccessRequestRequest {
    pub response_message: Option<String>,
}

#[derive(Serialize)]
pub struct AccessRequestResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub requested_by: Uuid,
    pub requested_level: String,
    pub status: String,
    pub message: Option<String>,
    pub response_message: Option<String>,
    pub decided_by: Option<Uuid>,
    pub decided_at: Option<String>,
    pub created_at: String,
}

impl From<AccessRequest> for AccessRequestResponse {
    fn from(req: AccessRequest) -> Self {
        Self {
            id: req.id,
            document_id: req.document_id,
            requested_by: req.requested_by,
            requested_level: req.requested_level,
            status: req.status,
            message: req.message,
            response_message: req.response_message,
            decided_by: req.decided_by,
            decided_at: req.decided_at.map(to_iso),
            created_at: to_iso(req.created_at),
        }
    }
}

pub async fn create_access_request(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: ClientMeta,
    Json(payload): Json<CreateAccessRequestRequest>,
) -> AppResult<(StatusCode, Json<AccessRequestResponse>)> {
    let requested_level = AccessLevel::parse(&payload.requested_level).ok_or_else(|| {
        AppError::bad_request("requested_level must be one of viewer, commenter, editor, owner")
    })?;

    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() {
        return Err(AppError::not_found());
    }

    // Someone who already holds the requested level has nothing to request.
    if let Some(level) = access::effective_document_access(&mut conn, &user, &doc)? {
        if level >= requested_level {
            return Err(AppError::bad_request(
                "you already have the requested access level",
            ));
        }
    }

    let new_request = NewAccessRequest {
        id: Uuid::new_v4(),
        document_id,
        requested_by: user.user_id,
        requested_level: requested_level.as_str().to_string(),
        status: STATUS_PENDING.to_string(),
        message: payload.message,
    };

    match diesel::insert_into(access_requests::table)
        .values(&new_request)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict(
                "a pending access request already exists for this document",
            ));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let created: AccessRequest = access_requests::table
        .find(new_request.id)
        .first(&mut conn)?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_ACCESS_REQUEST_CREATE,
        Some(document_id),
        json!({
            "access_request_id": created.id,
            "requested_level": created.requested_level,
        }),
        &meta,
    );

    Ok((
        StatusCode::CREATED,
        Json(AccessRequestResponse::from(created)),
    ))
}

pub async fn list_my_access_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<AccessRequestResponse>>> {
    let mut conn = state.db()?;

    let rows: Vec<AccessRequest> = access_requests::table
        .filter(access_requests::requested_by.eq(user.user_id))
        .order(access_requests::created_at.desc())
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter().map(AccessRequestResponse::from).collect(),
    ))
}

pub async fn list_document_access_requests(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<AccessRequestResponse>>> {
    let mut conn = state.db()?;

    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    if doc.deleted_at.is_some() && !user.is_admin() {
        return Err(AppError::not_found());
    }
    access::require_document_access(&mut conn, &user, &doc, AccessLevel::Owner)?;

    let rows: Vec<AccessRequest> = access_requests::table
        .filter(access_requests::document_id.eq(document_id))
        .order(access_requests::created_at.desc())
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter().map(AccessRequestResponse::from).collect(),
    ))
}

fn load_pending_for_decision(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    request_id: Uuid,
) -> AppResult<(AccessRequest, Document)> {
    let request: AccessRequest = access_requests::table.find(request_id).first(conn)?;
    let doc: Document = documents::table.find(request.document_id).first(conn)?;
    access::require_document_access(conn, user, &doc, AccessLevel::Owner)?;

    if request.status != STATUS_PENDING {
        return Err(AppError::bad_request("access request was already decided"));
    }
    Ok((request, doc))
}

pub async fn approve_access_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: ClientMeta,
    payload: Option<Json<DecideAccessRequestRequest>>,
) -> AppResult<Json<AccessRequestResponse>> {
    let mut conn = state.db()?;
    let (request, doc) = load_pending_for_decision(&mut conn, &user, request_id)?;
    let response_message = payload.and_then(|p| p.0.response_message);

    let now = Utc::now().naive_utc();
    let updated = conn.transaction::<AccessRequest, diesel::result::Error, _>(|conn| {
        let new_permission = NewDocumentPermission {
            id: Uuid::new_v4(),
            document_id: request.document_id,
            user_id: Some(request.requested_by),
            group_id: None,
            role: None,
            access_level: request.requested_level.clone(),
            granted_by: user.user_id,
            expires_at: None,
        };
        diesel::insert_into(document_permissions::table)
            .values(&new_permission)
            .execute(conn)?;

        diesel::update(access_requests::table.find(request_id))
            .set((
                access_requests::status.eq(STATUS_APPROVED),
                access_requests::response_message.eq(response_message.as_deref()),
                access_requests::decided_by.eq(Some(user.user_id)),
                access_requests::decided_at.eq(Some(now)),
                access_requests::updated_at.eq(now),
            ))
            .execute(conn)?;

        access_requests::table.find(request_id).first(conn)
    })?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_ACCESS_REQUEST_DECIDE,
        Some(doc.id),
        json!({
            "access_request_id": request_id,
            "status": STATUS_APPROVED,
            "requested_by": request.requested_by,
        }),
        &meta,
    );

    Ok(Json(AccessRequestResponse::from(updated)))
}

pub async fn deny_access_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: ClientMeta,
    payload: Option<Json<DecideAccessRequestRequest>>,
) -> AppResult<Json<AccessRequestResponse>> {
    let mut conn = state.db()?;
    let (request, doc) = load_pending_for_decision(&mut conn, &user, request_id)?;
    let response_message = payload.and_then(|p| p.0.response_message);

    let now = Utc::now().naive_utc();
    diesel::update(access_requests::table.find(request_id))
        .set((
            access_requests::status.eq(STATUS_DENIED),
            access_requests::response_message.eq(response_message.as_deref()),
            access_requests::decided_by.eq(Some(user.user_id)),
            access_requests::decided_at.eq(Some(now)),
            access_requests::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let updated: AccessRequest = access_requests::table.find(request_id).first(&mut conn)?;

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_ACCESS_REQUEST_DECIDE,
        Some(doc.id),
        json!({
            "access_request_id": request_id,
            "status": STATUS_DENIED,
            "requested_by": request.requested_by,
        }),
        &meta,
    );

    Ok(Json(AccessRequestResponse::from(updated)))
}
