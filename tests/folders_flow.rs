mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
struct FolderResponse {
    folder: FolderInfo,
}

#[derive(Deserialize)]
struct FolderInfo {
    id: Uuid,
    name: String,
    parent_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct FolderContents {
    folder: Option<FolderInfo>,
    subfolders: Vec<FolderInfo>,
    documents: Vec<DocumentListItem>,
}

#[derive(Deserialize)]
struct DocumentListItem {
    id: Uuid,
}

#[derive(Deserialize)]
struct DocumentDetail {
    document: DocumentListItem,
}

async fn create_folder(
    app: &TestApp,
    token: &str,
    name: &str,
    parent_id: Option<Uuid>,
) -> Result<FolderInfo> {
    let response = app
        .post_json(
            "/api/folders",
            &json!({ "name": name, "parent_id": parent_id }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK, "folder create failed");
    let body = body_to_vec(response.into_body()).await?;
    let parsed: FolderResponse = serde_json::from_slice(&body)?;
    Ok(parsed.folder)
}

#[tokio::test]
async fn folder_tree_and_contents() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("filer", "pass-word-1", "user").await?;
    let token = app.login_token("filer", "pass-word-1").await?;

    let parent = create_folder(&app, &token, "Finance", None).await?;
    let child = create_folder(&app, &token, "Invoices", Some(parent.id)).await?;
    assert_eq!(child.parent_id, Some(parent.id));

    let response = app
        .upload_document(
            "/api/documents",
            "invoice-01.txt",
            "text/plain",
            b"invoice body",
            Some(child.id),
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .get(&format!("/api/folders/{}/contents", parent.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let contents: FolderContents = serde_json::from_slice(&body)?;
    assert_eq!(contents.folder.as_ref().map(|f| f.id), Some(parent.id));
    assert_eq!(contents.subfolders.len(), 1);
    assert!(contents.documents.is_empty());

    let response = app
        .get(&format!("/api/folders/{}/contents", child.id), Some(&token))
        .await?;
    let body = body_to_vec(response.into_body()).await?;
    let contents: FolderContents = serde_json::from_slice(&body)?;
    assert_eq!(contents.documents.len(), 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn duplicate_sibling_names_are_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("filer", "pass-word-1", "user").await?;
    let token = app.login_token("filer", "pass-word-1").await?;

    create_folder(&app, &token, "Reports", None).await?;

    let response = app
        .post_json(
            "/api/folders",
            &json!({ "name": "Reports", "parent_id": null }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn ensure_path_creates_missing_segments_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("filer", "pass-word-1", "user").await?;
    let token = app.login_token("filer", "pass-word-1").await?;

    let response = app
        .post_json(
            "/api/folders/path",
            &json!({ "parent_id": null, "segments": ["Archive", "2026", "Q3"] }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let first: FolderResponse = serde_json::from_slice(&body)?;
    assert_eq!(first.folder.name, "Q3");

    // Idempotent: the same path resolves to the same leaf.
    let response = app
        .post_json(
            "/api/folders/path",
            &json!({ "parent_id": null, "segments": ["Archive", "2026", "Q3"] }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let second: FolderResponse = serde_json::from_slice(&body)?;
    assert_eq!(second.folder.id, first.folder.id);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn moving_a_folder_under_its_descendant_fails() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("filer", "pass-word-1", "user").await?;
    let token = app.login_token("filer", "pass-word-1").await?;

    let top = create_folder(&app, &token, "Top", None).await?;
    let nested = create_folder(&app, &token, "Nested", Some(top.id)).await?;

    let response = app
        .patch_json(
            &format!("/api/folders/{}", top.id),
            &json!({ "parent_id": nested.id }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn moving_a_document_into_an_inaccessible_folder_fails() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("filer", "pass-word-1", "user").await?;
    app.insert_user("intruder", "pass-word-2", "user").await?;
    let filer_token = app.login_token("filer", "pass-word-1").await?;
    let intruder_token = app.login_token("intruder", "pass-word-2").await?;

    let vault = create_folder(&app, &filer_token, "Vault", None).await?;

    let response = app
        .upload_document(
            "/api/documents",
            "mine.txt",
            "text/plain",
            b"intruder body",
            None,
            &intruder_token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let detail: DocumentDetail = serde_json::from_slice(&body)?;

    // Editing your own document does not let you plant it in a folder
    // you cannot reach.
    let response = app
        .patch_json(
            &format!("/api/documents/{}/folder", detail.document.id),
            &json!({ "folder_id": vault.id }),
            Some(&intruder_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_json(
            "/api/documents/bulk/move",
            &json!({ "document_ids": [detail.document.id], "folder_id": vault.id }),
            Some(&intruder_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The folder's creator can still file documents there.
    let response = app
        .upload_document(
            "/api/documents",
            "theirs.txt",
            "text/plain",
            b"filer body",
            None,
            &filer_token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let own: DocumentDetail = serde_json::from_slice(&body)?;

    let response = app
        .patch_json(
            &format!("/api/documents/{}/folder", own.document.id),
            &json!({ "folder_id": vault.id }),
            Some(&filer_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn root_listing_hides_other_users_folders() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("filer", "pass-word-1", "user").await?;
    app.insert_user("other", "pass-word-2", "user").await?;
    let filer_token = app.login_token("filer", "pass-word-1").await?;
    let other_token = app.login_token("other", "pass-word-2").await?;

    let private = create_folder(&app, &filer_token, "Private", None).await?;

    let response = app.get("/api/folders/root/contents", Some(&other_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let contents: FolderContents = serde_json::from_slice(&body)?;
    assert!(contents.subfolders.iter().all(|f| f.id != private.id));

    let response = app.get("/api/folders/root/contents", Some(&filer_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let contents: FolderContents = serde_json::from_slice(&body)?;
    assert!(contents.subfolders.iter().any(|f| f.id == private.id));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn delete_requires_empty_folder() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("filer", "pass-word-1", "user").await?;
    let token = app.login_token("filer", "pass-word-1").await?;

    let folder = create_folder(&app, &token, "Keep", None).await?;
    let response = app
        .upload_document(
            "/api/documents",
            "keep.txt",
            "text/plain",
            b"keep body",
            Some(folder.id),
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .delete(&format!("/api/folders/{}", folder.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}
