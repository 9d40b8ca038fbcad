//! Access-level ordering and effective permission resolution.
//!
//! A grant targets exactly one of: a user, a group, or a role. The
//! effective level of a user on a document is the most permissive live
//! grant that matches them, combined with folder grants flagged
//! `inherit_to_children` on the document's folder chain. Document
//! uploaders and admins always resolve to `owner`.

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Document, DocumentPermission, Folder, FolderPermission};
use crate::schema::{document_permissions, folder_permissions, folders, group_members};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    Viewer,
    Commenter,
    Editor,
    Owner,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Viewer => "viewer",
            AccessLevel::Commenter => "commenter",
            AccessLevel::Editor => "editor",
            AccessLevel::Owner => "owner",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "viewer" => Some(AccessLevel::Viewer),
            "commenter" => Some(AccessLevel::Commenter),
            "editor" => Some(AccessLevel::Editor),
            "owner" => Some(AccessLevel::Owner),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Manager,
    User,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::User => "user",
            Role::Viewer => "viewer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "user" => Some(Role::User),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }
}

/// One permission row reduced to the fields resolution cares about.
#[derive(Debug, Clone)]
pub struct Grant {
    pub user_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub role: Option<String>,
    pub access_level: String,
    pub expires_at: Option<NaiveDateTime>,
    pub revoked_at: Option<NaiveDateTime>,
}

impl From<&DocumentPermission> for Grant {
    fn from(p: &DocumentPermission) -> Self {
        Grant {
            user_id: p.user_id,
            group_id: p.group_id,
            role: p.role.clone(),
            access_level: p.access_level.clone(),
            expires_at: p.expires_at,
            revoked_at: p.revoked_at,
        }
    }
}

impl From<&FolderPermission> for Grant {
    fn from(p: &FolderPermission) -> Self {
        Grant {
            user_id: p.user_id,
            group_id: p.group_id,
            role: p.role.clone(),
            access_level: p.access_level.clone(),
            expires_at: p.expires_at,
            revoked_at: p.revoked_at,
        }
    }
}

/// The caller being matched against grants.
#[derive(Debug, Clone)]
pub struct Subject<'a> {
    pub user_id: Uuid,
    pub role: &'a str,
    pub group_ids: &'a [Uuid],
}

fn grant_is_live(grant: &Grant, now: NaiveDateTime) -> bool {
    if grant.revoked_at.is_some() {
        return false;
    }
    match grant.expires_at {
        Some(expires) => expires > now,
        None => true,
    }
}

fn grant_matches(grant: &Grant, subject: &Subject<'_>) -> bool {
    if let Some(user_id) = grant.user_id {
        return user_id == subject.user_id;
    }
    if let Some(group_id) = grant.group_id {
        return subject.group_ids.contains(&group_id);
    }
    if let Some(role) = grant.role.as_deref() {
        return role == subject.role;
    }
    false
}

/// Most permissive live grant matching the subject, if any.
pub fn resolve_level(
    grants: &[Grant],
    subject: &Subject<'_>,
    now: NaiveDateTime,
) -> Option<AccessLevel> {
    grants
        .iter()
        .filter(|grant| grant_is_live(grant, now))
        .filter(|grant| grant_matches(grant, subject))
        .filter_map(|grant| AccessLevel::parse(&grant.access_level))
        .max()
}

pub fn user_group_ids(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Vec<Uuid>> {
    let ids = group_members::table
        .filter(group_members::user_id.eq(user_id))
        .select(group_members::group_id)
        .load(conn)?;
    Ok(ids)
}

/// The folder itself plus every ancestor, root last. Guards against
/// parent cycles by refusing to revisit an id.
pub fn folder_chain_ids(conn: &mut PgConnection, folder_id: Uuid) -> AppResult<Vec<Uuid>> {
    let mut ids = vec![folder_id];
    let mut current = folder_id;

    loop {
        let parent: Option<Option<Uuid>> = folders::table
            .find(current)
            .select(folders::parent_id)
            .first(conn)
            .optional()?;

        match parent.flatten() {
            Some(parent_id) if !ids.contains(&parent_id) => {
                ids.push(parent_id);
                current = parent_id;
            }
            _ => break,
        }
    }

    Ok(ids)
}

/// Effective level of `user` on `doc`, or `None` when the user has no
/// access at all.
pub fn effective_document_access(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    doc: &Document,
) -> AppResult<Option<AccessLevel>> {
    if doc.created_by == user.user_id || user.is_admin() {
        return Ok(Some(AccessLevel::Owner));
    }

    let now = Utc::now().naive_utc();
    let group_ids = user_group_ids(conn, user.user_id)?;
    let subject = Subject {
        user_id: user.user_id,
        role: &user.role,
        group_ids: &group_ids,
    };

    let mut grants: Vec<Grant> = document_permissions::table
        .filter(document_permissions::document_id.eq(doc.id))
        .load::<DocumentPermission>(conn)?
        .iter()
        .map(Grant::from)
        .collect();

    if let Some(folder_id) = doc.folder_id {
        let chain = folder_chain_ids(conn, folder_id)?;
        let inherited: Vec<FolderPermission> = folder_permissions::table
            .filter(folder_permissions::folder_id.eq_any(&chain))
            .filter(folder_permissions::inherit_to_children.eq(true))
            .load(conn)?;
        grants.extend(inherited.iter().map(Grant::from));
    }

    Ok(resolve_level(&grants, &subject, now))
}

/// Effective level of `user` on `folder`. Direct grants on the folder
/// always count; grants on ancestors only when they inherit.
pub fn effective_folder_access(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    folder: &Folder,
) -> AppResult<Option<AccessLevel>> {
    if folder.created_by == user.user_id || user.is_admin() {
        return Ok(Some(AccessLevel::Owner));
    }

    let now = Utc::now().naive_utc();
    let group_ids = user_group_ids(conn, user.user_id)?;
    let subject = Subject {
        user_id: user.user_id,
        role: &user.role,
        group_ids: &group_ids,
    };

    let direct: Vec<FolderPermission> = folder_permissions::table
        .filter(folder_permissions::folder_id.eq(folder.id))
        .load(conn)?;
    let mut grants: Vec<Grant> = direct.iter().map(Grant::from).collect();

    let chain = folder_chain_ids(conn, folder.id)?;
    let ancestors: Vec<Uuid> = chain.into_iter().skip(1).collect();
    if !ancestors.is_empty() {
        let inherited: Vec<FolderPermission> = folder_permissions::table
            .filter(folder_permissions::folder_id.eq_any(&ancestors))
            .filter(folder_permissions::inherit_to_children.eq(true))
            .load(conn)?;
        grants.extend(inherited.iter().map(Grant::from));
    }

    Ok(resolve_level(&grants, &subject, now))
}

/// Loads the effective level and enforces a floor. Users with no access
/// get a 404 so the document's existence stays hidden.
pub fn require_document_access(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    doc: &Document,
    need: AccessLevel,
) -> AppResult<AccessLevel> {
    match effective_document_access(conn, user, doc)? {
        None => Err(AppError::not_found()),
        Some(level) if level >= need => Ok(level),
        Some(_) => Err(AppError::forbidden(format!(
            "{} access required",
            need.as_str()
        ))),
    }
}
