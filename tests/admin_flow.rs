mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
struct UserEntry {
    id: Uuid,
    username: String,
    role: String,
    is_active: bool,
}

#[derive(Deserialize)]
struct OrgEntry {
    id: Uuid,
    slug: String,
}

#[derive(Deserialize)]
struct AuditEntry {
    action: String,
    user_id: Option<Uuid>,
}

#[tokio::test]
async fn admin_manages_users_and_organizations() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("root", "pass-word-1", "admin").await?;
    let admin_token = app.login_token("root", "pass-word-1").await?;

    let response = app
        .post_json(
            "/api/organizations",
            &json!({ "name": "Kigali Branch Office" }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let org: OrgEntry = serde_json::from_slice(&body)?;
    assert_eq!(org.slug, "kigali-branch-office");

    let response = app
        .post_json(
            "/api/users",
            &json!({
                "username": "claire",
                "email": "claire@example.test",
                "password": "initial-pass",
                "role": "manager",
                "organization_id": org.id,
            }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let created: UserEntry = serde_json::from_slice(&body)?;
    assert_eq!(created.role, "manager");

    // Duplicate usernames conflict.
    let response = app
        .post_json(
            "/api/users",
            &json!({
                "username": "claire",
                "email": "claire2@example.test",
                "password": "initial-pass",
                "role": "user",
            }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .delete(&format!("/api/users/{}", created.id), Some(&admin_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.get("/api/users", Some(&admin_token)).await?;
    let body = body_to_vec(response.into_body()).await?;
    let listed: Vec<UserEntry> = serde_json::from_slice(&body)?;
    let claire = listed
        .iter()
        .find(|u| u.username == "claire")
        .expect("user listed");
    assert!(!claire.is_active);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn non_admins_are_locked_out() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("plain", "pass-word-1", "user").await?;
    let token = app.login_token("plain", "pass-word-1").await?;

    let response = app.get("/api/users", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.get("/api/audit", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.get("/api/employees", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn audit_trail_records_logins_and_uploads() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let admin_id = app.insert_user("root", "pass-word-1", "admin").await?;
    let admin_token = app.login_token("root", "pass-word-1").await?;

    let response = app
        .upload_document(
            "/api/documents",
            "audited.txt",
            "text/plain",
            b"audited body",
            None,
            &admin_token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .get("/api/audit?action=auth.login", Some(&admin_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let logins: Vec<AuditEntry> = serde_json::from_slice(&body)?;
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].user_id, Some(admin_id));

    let response = app
        .get("/api/audit?action=document.upload", Some(&admin_token))
        .await?;
    let body = body_to_vec(response.into_body()).await?;
    let uploads: Vec<AuditEntry> = serde_json::from_slice(&body)?;
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].action, "document.upload");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn managers_run_the_employee_registry() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("hr", "pass-word-1", "manager").await?;
    let token = app.login_token("hr", "pass-word-1").await?;

    #[derive(Deserialize)]
    struct EmployeeEntry {
        id: Uuid,
        full_name: String,
        department: Option<String>,
    }

    let response = app
        .post_json(
            "/api/employees",
            &json!({
                "full_name": "Aline Uwase",
                "department": "Legal",
                "position": "Counsel",
                "hired_on": "2024-02-01",
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let employee: EmployeeEntry = serde_json::from_slice(&body)?;
    assert_eq!(employee.full_name, "Aline Uwase");

    let response = app
        .patch_json(
            &format!("/api/employees/{}", employee.id),
            &json!({ "department": "Compliance" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let updated: EmployeeEntry = serde_json::from_slice(&body)?;
    assert_eq!(updated.department.as_deref(), Some("Compliance"));

    let response = app
        .delete(&format!("/api/employees/{}", employee.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    app.cleanup().await?;
    Ok(())
}
