mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
struct DocumentDetail {
    document: DocumentInfo,
}

#[derive(Deserialize)]
struct DocumentInfo {
    id: Uuid,
    title: String,
    original_name: String,
    deleted_at: Option<String>,
    expires_at: Option<String>,
    #[serde(default)]
    current_version: Option<DocumentVersion>,
}

#[derive(Deserialize)]
struct DocumentVersion {
    id: Uuid,
    version_number: i32,
    checksum: String,
    size_bytes: i64,
    download_path: String,
}

#[derive(Deserialize)]
struct VersionEntry {
    version_number: i32,
    checksum: String,
}

#[derive(Deserialize)]
struct DocumentListItem {
    id: Uuid,
}

#[derive(Deserialize)]
struct AccessProbe {
    access_level: String,
}

async fn upload(app: &TestApp, token: &str, name: &str, data: &[u8]) -> Result<DocumentInfo> {
    let response = app
        .upload_document("/api/documents", name, "text/plain", data, None, token)
        .await?;
    let status = response.status();
    assert!(
        status == StatusCode::CREATED || status == StatusCode::OK,
        "upload failed with {status}"
    );
    let body = body_to_vec(response.into_body()).await?;
    let detail: DocumentDetail = serde_json::from_slice(&body)?;
    Ok(detail.document)
}

#[tokio::test]
async fn upload_download_and_soft_delete() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("uploader", "pass-word-1", "user").await?;
    let token = app.login_token("uploader", "pass-word-1").await?;

    let doc = upload(&app, &token, "report.txt", b"quarterly figures").await?;
    assert_eq!(doc.title, "report");
    assert_eq!(doc.original_name, "report.txt");
    let version = doc.current_version.expect("current version present");
    assert_eq!(version.version_number, 1);
    assert!(version.size_bytes > 0);
    assert!(version.download_path.starts_with("/download/"));

    // Uploader owns the document.
    let response = app
        .get(&format!("/api/documents/{}/access", doc.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let probe: AccessProbe = serde_json::from_slice(&body)?;
    assert_eq!(probe.access_level, "owner");

    let response = app
        .delete(&format!("/api/documents/{}", doc.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Soft-deleted documents vanish from regular reads.
    let response = app
        .get(&format!("/api/documents/{}", doc.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/api/documents", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let listed: Vec<DocumentListItem> = serde_json::from_slice(&body)?;
    assert!(listed.iter().all(|item| item.id != doc.id));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn duplicate_upload_returns_existing_document() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("dedup", "pass-word-1", "user").await?;
    let token = app.login_token("dedup", "pass-word-1").await?;

    let first = upload(&app, &token, "contract.txt", b"identical bytes").await?;

    let response = app
        .upload_document(
            "/api/documents",
            "contract-copy.txt",
            "text/plain",
            b"identical bytes",
            None,
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let detail: DocumentDetail = serde_json::from_slice(&body)?;
    assert_eq!(detail.document.id, first.id);

    assert_eq!(app.storage().object_count().await, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn identical_bytes_from_another_user_create_a_new_document() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("owner", "pass-word-1", "user").await?;
    app.insert_user("stranger", "pass-word-2", "user").await?;
    let owner_token = app.login_token("owner", "pass-word-1").await?;
    let stranger_token = app.login_token("stranger", "pass-word-2").await?;

    let original = upload(&app, &owner_token, "payroll.txt", b"confidential body").await?;

    // The stranger has no grant on the owner's document, so a checksum
    // match must not hand it over.
    let response = app
        .upload_document(
            "/api/documents",
            "coincidence.txt",
            "text/plain",
            b"confidential body",
            None,
            &stranger_token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let detail: DocumentDetail = serde_json::from_slice(&body)?;
    assert_ne!(detail.document.id, original.id);
    assert_eq!(detail.document.original_name, "coincidence.txt");

    assert_eq!(app.storage().object_count().await, 2);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn renaming_to_a_siblings_filename_is_allowed() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("editor", "pass-word-1", "user").await?;
    let token = app.login_token("editor", "pass-word-1").await?;

    upload(&app, &token, "summary.txt", b"first body").await?;
    let second = upload(&app, &token, "details.txt", b"second body").await?;

    // Filenames are not unique within a folder.
    let response = app
        .patch_json(
            &format!("/api/documents/{}", second.id),
            &json!({ "title": "summary" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let detail: DocumentDetail = serde_json::from_slice(&body)?;
    assert_eq!(detail.document.title, "summary");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn version_history_grows_and_restores() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("versioner", "pass-word-1", "user").await?;
    let token = app.login_token("versioner", "pass-word-1").await?;

    let doc = upload(&app, &token, "notes.txt", b"first draft").await?;
    let first_version = doc.current_version.expect("version");

    let response = app
        .upload_document(
            &format!("/api/documents/{}/versions", doc.id),
            "notes.txt",
            "text/plain",
            b"second draft",
            None,
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let detail: DocumentDetail = serde_json::from_slice(&body)?;
    let second_version = detail.document.current_version.expect("version");
    assert_eq!(second_version.version_number, 2);
    assert_ne!(second_version.checksum, first_version.checksum);

    // Re-uploading the current content conflicts.
    let response = app
        .upload_document(
            &format!("/api/documents/{}/versions", doc.id),
            "notes.txt",
            "text/plain",
            b"second draft",
            None,
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Restoring version 1 appends version 3 with the old checksum.
    let response = app
        .post_json(
            &format!(
                "/api/documents/{}/versions/{}/restore",
                doc.id, first_version.id
            ),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let detail: DocumentDetail = serde_json::from_slice(&body)?;
    let restored = detail.document.current_version.expect("version");
    assert_eq!(restored.version_number, 3);
    assert_eq!(restored.checksum, first_version.checksum);

    let response = app
        .get(&format!("/api/documents/{}/versions", doc.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let versions: Vec<VersionEntry> = serde_json::from_slice(&body)?;
    assert_eq!(versions.len(), 3);
    assert_eq!(versions[0].version_number, 3);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn update_patches_title_and_expiry() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("editor", "pass-word-1", "user").await?;
    let token = app.login_token("editor", "pass-word-1").await?;

    let doc = upload(&app, &token, "draft.txt", b"draft body").await?;

    let response = app
        .patch_json(
            &format!("/api/documents/{}", doc.id),
            &json!({
                "title": "Final report",
                "expires_at": "2030-01-01T00:00:00Z",
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let detail: DocumentDetail = serde_json::from_slice(&body)?;
    assert_eq!(detail.document.title, "Final report");
    assert!(detail.document.expires_at.is_some());

    // A JSON null clears the expiry again.
    let response = app
        .patch_json(
            &format!("/api/documents/{}", doc.id),
            &json!({ "expires_at": null }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let detail: DocumentDetail = serde_json::from_slice(&body)?;
    assert!(detail.document.expires_at.is_none());
    assert!(detail.document.deleted_at.is_none());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn other_users_cannot_see_unshared_documents() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("owner", "pass-word-1", "user").await?;
    app.insert_user("stranger", "pass-word-2", "user").await?;
    let owner_token = app.login_token("owner", "pass-word-1").await?;
    let stranger_token = app.login_token("stranger", "pass-word-2").await?;

    let doc = upload(&app, &owner_token, "private.txt", b"owner only").await?;

    // No grant resolves to 404, not 403.
    let response = app
        .get(&format!("/api/documents/{}", doc.id), Some(&stranger_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/api/documents", Some(&stranger_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let listed: Vec<DocumentListItem> = serde_json::from_slice(&body)?;
    assert!(listed.is_empty());

    app.cleanup().await?;
    Ok(())
}
