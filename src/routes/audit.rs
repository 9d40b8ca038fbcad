use axum::extract::{Json, Query, State};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::models::AuditLog;
use crate::schema::audit_logs;
use crate::state::AppState;

use super::documents::to_iso;

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 1000;

#[derive(Deserialize, Default)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub document_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct AuditLogResponse {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub document_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: String,
}

impl From<AuditLog> for AuditLogResponse {
    fn from(entry: AuditLog) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user_id,
            action: entry.action,
            document_id: entry.document_id,
            details: entry.details,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            created_at: to_iso(entry.created_at),
        }
    }
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(params): Query<AuditQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<AuditLogResponse>>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut query = audit_logs::table.into_boxed();
    if let Some(action) = params.action {
        query = query.filter(audit_logs::action.eq(action));
    }
    if let Some(document_id) = params.document_id {
        query = query.filter(audit_logs::document_id.eq(document_id));
    }
    if let Some(user_id) = params.user_id {
        query = query.filter(audit_logs::user_id.eq(user_id));
    }

    let rows: Vec<AuditLog> = query
        .order(audit_logs::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(AuditLogResponse::from).collect()))
}
