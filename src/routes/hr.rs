use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Employee, NewEmployee};
use crate::schema::employees;
use crate::state::AppState;

use super::documents::to_iso;

#[derive(Deserialize)]
pub struct CreateEmployeeRequest {
    pub full_name: String,
    pub organization_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub department: Option<String>,
    pub position: Option<String>,
    pub hired_on: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
pub struct UpdateEmployeeRequest {
    pub full_name: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
    pub hired_on: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Serialize)]
pub struct EmployeeResponse {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub full_name: String,
    pub department: Option<String>,
    pub position: Option<String>,
    pub hired_on: Option<String>,
    pub metadata: Value,
    pub created_at: String,
}

impl From<Employee> for EmployeeResponse {
    fn from(employee: Employee) -> Self {
        Self {
            id: employee.id,
            organization_id: employee.organization_id,
            user_id: employee.user_id,
            full_name: employee.full_name,
            department: employee.department,
            position: employee.position,
            hired_on: employee.hired_on.map(|d| d.to_string()),
            metadata: employee.metadata,
            created_at: to_iso(employee.created_at),
        }
    }
}

fn parse_hired_on(raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::bad_request("hired_on must be a YYYY-MM-DD date"))
}

fn validate_metadata(metadata: &Value) -> AppResult<()> {
    if !metadata.is_object() {
        return Err(AppError::bad_request("metadata must be a JSON object"));
    }
    Ok(())
}

pub async fn list_employees(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<EmployeeResponse>>> {
    user.require_manager()?;
    let mut conn = state.db()?;

    let rows: Vec<Employee> = employees::table
        .order(employees::full_name.asc())
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(EmployeeResponse::from).collect()))
}

pub async fn get_employee(
    State(state): State<AppState>,
    Path(employee_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<EmployeeResponse>> {
    user.require_manager()?;
    let mut conn = state.db()?;

    let employee: Employee = employees::table.find(employee_id).first(&mut conn)?;
    Ok(Json(EmployeeResponse::from(employee)))
}

pub async fn create_employee(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateEmployeeRequest>,
) -> AppResult<(StatusCode, Json<EmployeeResponse>)> {
    user.require_manager()?;

    let full_name = payload.full_name.trim();
    if full_name.is_empty() {
        return Err(AppError::bad_request("full_name must not be empty"));
    }
    let hired_on = payload
        .hired_on
        .as_deref()
        .map(parse_hired_on)
        .transpose()?;
    let metadata = match payload.metadata {
        Some(metadata) => {
            validate_metadata(&metadata)?;
            metadata
        }
        None => Value::Object(Default::default()),
    };

    let mut conn = state.db()?;
    let new_employee = NewEmployee {
        id: Uuid::new_v4(),
        organization_id: payload.organization_id,
        user_id: payload.user_id,
        full_name: full_name.to_string(),
        department: payload.department,
        position: payload.position,
        hired_on,
        metadata,
    };

    diesel::insert_into(employees::table)
        .values(&new_employee)
        .execute(&mut conn)?;

    let created: Employee = employees::table.find(new_employee.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(EmployeeResponse::from(created))))
}

pub async fn update_employee(
    State(state): State<AppState>,
    Path(employee_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateEmployeeRequest>,
) -> AppResult<Json<EmployeeResponse>> {
    user.require_manager()?;
    let mut conn = state.db()?;

    let existing: Employee = employees::table.find(employee_id).first(&mut conn)?;

    let full_name = match payload.full_name {
        Some(name) => {
            let trimmed = name.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("full_name must not be empty"));
            }
            trimmed
        }
        None => existing.full_name.clone(),
    };
    let department = payload.department.or(existing.department);
    let position = payload.position.or(existing.position);
    let hired_on = match payload.hired_on.as_deref() {
        Some(raw) => Some(parse_hired_on(raw)?),
        None => existing.hired_on,
    };
    let metadata = match payload.metadata {
        Some(metadata) => {
            validate_metadata(&metadata)?;
            metadata
        }
        None => existing.metadata.clone(),
    };

    let now = Utc::now().naive_utc();
    diesel::update(employees::table.find(employee_id))
        .set((
            employees::full_name.eq(&full_name),
            employees::department.eq(&department),
            employees::position.eq(&position),
            employees::hired_on.eq(hired_on),
            employees::metadata.eq(&metadata),
            employees::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let updated: Employee = employees::table.find(employee_id).first(&mut conn)?;
    Ok(Json(EmployeeResponse::from(updated)))
}

pub async fn delete_employee(
    State(state): State<AppState>,
    Path(employee_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    user.require_manager()?;
    let mut conn = state.db()?;

    let deleted = diesel::delete(employees::table.find(employee_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}
