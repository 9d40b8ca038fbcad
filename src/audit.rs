//! Append-only audit trail. Writes are best-effort: a failed audit
//! insert is logged and never fails the request that triggered it.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use diesel::prelude::*;
use diesel::PgConnection;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::models::NewAuditLog;
use crate::schema::audit_logs;

pub const ACTION_LOGIN: &str = "auth.login";
pub const ACTION_LOGOUT: &str = "auth.logout";
pub const ACTION_DOCUMENT_UPLOAD: &str = "document.upload";
pub const ACTION_DOCUMENT_UPDATE: &str = "document.update";
pub const ACTION_DOCUMENT_DELETE: &str = "document.delete";
pub const ACTION_DOCUMENT_RESTORE: &str = "document.restore";
pub const ACTION_DOCUMENT_DOWNLOAD: &str = "document.download";
pub const ACTION_VERSION_UPLOAD: &str = "document.version.upload";
pub const ACTION_VERSION_RESTORE: &str = "document.version.restore";
pub const ACTION_PERMISSION_GRANT: &str = "permission.grant";
pub const ACTION_PERMISSION_REVOKE: &str = "permission.revoke";
pub const ACTION_SHARE_LINK_CREATE: &str = "share_link.create";
pub const ACTION_SHARE_LINK_REVOKE: &str = "share_link.revoke";
pub const ACTION_SHARE_LINK_ACCESS: &str = "share_link.access";
pub const ACTION_SHARE_LINK_DOWNLOAD: &str = "share_link.download";
pub const ACTION_ACCESS_REQUEST_CREATE: &str = "access_request.create";
pub const ACTION_ACCESS_REQUEST_DECIDE: &str = "access_request.decide";

/// Client address and user agent lifted from request headers.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip_address = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let user_agent = parts
            .headers
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.chars().take(255).collect::<String>());

        Ok(ClientMeta {
            ip_address,
            user_agent,
        })
    }
}

pub fn record(
    conn: &mut PgConnection,
    user_id: Option<Uuid>,
    action: &str,
    document_id: Option<Uuid>,
    details: Value,
    meta: &ClientMeta,
) {
    let entry = NewAuditLog {
        id: Uuid::new_v4(),
        user_id,
        action: action.to_string(),
        document_id,
        details,
        ip_address: meta.ip_address.clone(),
        user_agent: meta.user_agent.clone(),
    };

    if let Err(err) = diesel::insert_into(audit_logs::table)
        .values(&entry)
        .execute(conn)
    {
        warn!(action = %action, error = %err, "failed to append audit log entry");
    }
}
