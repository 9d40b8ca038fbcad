use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{NewOrganization, Organization};
use crate::schema::organizations;
use crate::state::AppState;

use super::documents::to_iso;

#[derive(Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub slug: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateOrganizationRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
}

#[derive(Serialize)]
pub struct OrganizationResponse {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub created_at: String,
}

impl From<Organization> for OrganizationResponse {
    fn from(org: Organization) -> Self {
        Self {
            id: org.id,
            name: org.name,
            slug: org.slug,
            created_at: to_iso(org.created_at),
        }
    }
}

fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_dash = true;
    for ch in value.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

pub async fn list_organizations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<OrganizationResponse>>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let rows: Vec<Organization> = organizations::table
        .order(organizations::name.asc())
        .load(&mut conn)?;
    Ok(Json(
        rows.into_iter().map(OrganizationResponse::from).collect(),
    ))
}

pub async fn create_organization(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateOrganizationRequest>,
) -> AppResult<(StatusCode, Json<OrganizationResponse>)> {
    user.require_admin()?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let slug = payload
        .slug
        .as_deref()
        .map(slugify)
        .unwrap_or_else(|| slugify(name));
    if slug.is_empty() {
        return Err(AppError::bad_request("slug must not be empty"));
    }

    let mut conn = state.db()?;
    let new_org = NewOrganization {
        id: Uuid::new_v4(),
        name: name.to_string(),
        slug,
    };

    match diesel::insert_into(organizations::table)
        .values(&new_org)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict("organization slug already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let created: Organization = organizations::table.find(new_org.id).first(&mut conn)?;
    Ok((
        StatusCode::CREATED,
        Json(OrganizationResponse::from(created)),
    ))
}

pub async fn update_organization(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateOrganizationRequest>,
) -> AppResult<Json<OrganizationResponse>> {
    user.require_admin()?;

    if payload.name.is_none() && payload.slug.is_none() {
        return Err(AppError::bad_request("no changes provided"));
    }

    let mut conn = state.db()?;
    let existing: Organization = organizations::table.find(org_id).first(&mut conn)?;
    let now = Utc::now().naive_utc();

    let name = match payload.name {
        Some(name) => {
            let trimmed = name.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("name must not be empty"));
            }
            trimmed
        }
        None => existing.name.clone(),
    };
    let slug = match payload.slug {
        Some(slug) => {
            let normalized = slugify(&slug);
            if normalized.is_empty() {
                return Err(AppError::bad_request("slug must not be empty"));
            }
            normalized
        }
        None => existing.slug.clone(),
    };

    match diesel::update(organizations::table.find(org_id))
        .set((
            organizations::name.eq(&name),
            organizations::slug.eq(&slug),
            organizations::updated_at.eq(now),
        ))
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict("organization slug already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let updated: Organization = organizations::table.find(org_id).first(&mut conn)?;
    Ok(Json(OrganizationResponse::from(updated)))
}

#[cfg(test)]
mod tests {
    use super::slugify;

    #[test]
    fn slugify_normalizes_names() {
        assert_eq!(slugify("Kigali Branch Office"), "kigali-branch-office");
        assert_eq!(slugify("  ACME!! Corp  "), "acme-corp");
        assert_eq!(slugify("---"), "");
    }
}
