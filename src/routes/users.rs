use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::Role;
use crate::auth::{password, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User};
use crate::schema::users;
use crate::state::AppState;

use super::documents::to_iso;

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub organization_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    pub is_active: Option<bool>,
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub organization_id: Option<Uuid>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            is_active: user.is_active,
            organization_id: user.organization_id,
            created_at: to_iso(user.created_at),
        }
    }
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let rows: Vec<User> = users::table.order(users::username.asc()).load(&mut conn)?;
    Ok(Json(rows.into_iter().map(UserResponse::from).collect()))
}

pub async fn create_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    user.require_admin()?;

    let username = payload.username.trim();
    if username.is_empty() {
        return Err(AppError::bad_request("username must not be empty"));
    }
    let email = payload.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("email must be a valid address"));
    }
    if payload.password.len() < 8 {
        return Err(AppError::bad_request(
            "password must be at least 8 characters",
        ));
    }
    if Role::parse(&payload.role).is_none() {
        return Err(AppError::bad_request(
            "role must be one of admin, manager, user, viewer",
        ));
    }

    let password_hash = password::hash_password(&payload.password)
        .map_err(|err| AppError::internal(format!("failed to hash password: {err}")))?;

    let mut conn = state.db()?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: email.to_string(),
        password_hash,
        role: payload.role,
        organization_id: payload.organization_id,
    };

    match diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict("username or email already in use"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let created: User = users::table.find(new_user.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(created))))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    user.require_admin()?;

    if payload.role.is_none() && payload.is_active.is_none() && payload.password.is_none() {
        return Err(AppError::bad_request("no changes provided"));
    }

    let mut conn = state.db()?;
    let target: User = users::table.find(user_id).first(&mut conn)?;
    let now = Utc::now().naive_utc();

    if let Some(role) = &payload.role {
        if Role::parse(role).is_none() {
            return Err(AppError::bad_request(
                "role must be one of admin, manager, user, viewer",
            ));
        }
        diesel::update(users::table.find(user_id))
            .set((users::role.eq(role), users::updated_at.eq(now)))
            .execute(&mut conn)?;
    }

    if let Some(is_active) = payload.is_active {
        if user_id == user.user_id && !is_active {
            return Err(AppError::bad_request("cannot deactivate yourself"));
        }
        diesel::update(users::table.find(user_id))
            .set((users::is_active.eq(is_active), users::updated_at.eq(now)))
            .execute(&mut conn)?;
    }

    if let Some(new_password) = &payload.password {
        if new_password.len() < 8 {
            return Err(AppError::bad_request(
                "password must be at least 8 characters",
            ));
        }
        let password_hash = password::hash_password(new_password)
            .map_err(|err| AppError::internal(format!("failed to hash password: {err}")))?;
        diesel::update(users::table.find(target.id))
            .set((
                users::password_hash.eq(password_hash),
                users::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
    }

    let updated: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(UserResponse::from(updated)))
}

pub async fn deactivate_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    user.require_admin()?;
    if user_id == user.user_id {
        return Err(AppError::bad_request("cannot deactivate yourself"));
    }

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let updated = diesel::update(users::table.find(user_id))
        .set((users::is_active.eq(false), users::updated_at.eq(now)))
        .execute(&mut conn)?;

    if updated == 0 {
        return Err(AppError::not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}
