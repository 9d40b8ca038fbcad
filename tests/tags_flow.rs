mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
struct TagEntry {
    id: Uuid,
    label: String,
    color: Option<String>,
    usage_count: i64,
}

#[derive(Deserialize)]
struct DocumentDetail {
    document: DocumentInfo,
}

#[derive(Deserialize)]
struct DocumentInfo {
    id: Uuid,
}

async fn create_tag(app: &TestApp, token: &str, label: &str, color: Option<&str>) -> Result<TagEntry> {
    let response = app
        .post_json(
            "/api/tags",
            &json!({ "label": label, "color": color }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK, "tag create failed");
    let body = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[tokio::test]
async fn tag_catalog_tracks_usage() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("tagger", "pass-word-1", "user").await?;
    let token = app.login_token("tagger", "pass-word-1").await?;

    let urgent = create_tag(&app, &token, "urgent", Some("#ff0000")).await?;

    let response = app
        .upload_document(
            "/api/documents",
            "tagged.txt",
            "text/plain",
            b"tagged body",
            None,
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let detail: DocumentDetail = serde_json::from_slice(&body)?;

    let response = app
        .post_json(
            &format!("/api/documents/{}/tags", detail.document.id),
            &json!({ "tag_ids": [urgent.id] }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.get("/api/tags", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let catalog: Vec<TagEntry> = serde_json::from_slice(&body)?;
    let entry = catalog
        .iter()
        .find(|t| t.id == urgent.id)
        .expect("tag listed");
    assert_eq!(entry.usage_count, 1);

    // A tag in use cannot be deleted.
    let response = app
        .delete(&format!("/api/tags/{}", urgent.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Detach, then delete succeeds.
    let response = app
        .delete(
            &format!("/api/documents/{}/tags/{}", detail.document.id, urgent.id),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .delete(&format!("/api/tags/{}", urgent.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deleted_documents_keep_their_tags() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("tagger", "pass-word-1", "user").await?;
    let token = app.login_token("tagger", "pass-word-1").await?;

    let tag = create_tag(&app, &token, "archive", None).await?;

    let response = app
        .upload_document(
            "/api/documents",
            "old.txt",
            "text/plain",
            b"old body",
            None,
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let detail: DocumentDetail = serde_json::from_slice(&body)?;

    let response = app
        .post_json(
            &format!("/api/documents/{}/tags", detail.document.id),
            &json!({ "tag_ids": [tag.id] }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .delete(&format!("/api/documents/{}", detail.document.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Soft-deleted documents reject tag changes like every other read.
    let response = app
        .delete(
            &format!("/api/documents/{}/tags/{}", detail.document.id, tag.id),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn tag_update_distinguishes_null_color() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("tagger", "pass-word-1", "user").await?;
    let token = app.login_token("tagger", "pass-word-1").await?;

    let tag = create_tag(&app, &token, "finance", Some("#00ff00")).await?;

    // Omitting color leaves it untouched.
    let response = app
        .patch_json(
            &format!("/api/tags/{}", tag.id),
            &json!({ "label": "finances" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let updated: TagEntry = serde_json::from_slice(&body)?;
    assert_eq!(updated.label, "finances");
    assert_eq!(updated.color.as_deref(), Some("#00ff00"));

    // Explicit null clears it.
    let response = app
        .patch_json(
            &format!("/api/tags/{}", tag.id),
            &json!({ "color": null }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let updated: TagEntry = serde_json::from_slice(&body)?;
    assert!(updated.color.is_none());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn duplicate_labels_are_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("tagger", "pass-word-1", "user").await?;
    let token = app.login_token("tagger", "pass-word-1").await?;

    create_tag(&app, &token, "legal", None).await?;

    let response = app
        .post_json("/api/tags", &json!({ "label": "legal" }), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}
