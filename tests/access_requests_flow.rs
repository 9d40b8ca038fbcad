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
}

#[derive(Deserialize)]
struct RequestEntry {
    id: Uuid,
    status: String,
    requested_level: String,
    response_message: Option<String>,
}

async fn upload(app: &TestApp, token: &str, name: &str) -> Result<Uuid> {
    let response = app
        .upload_document("/api/documents", name, "text/plain", name.as_bytes(), None, token)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let detail: DocumentDetail = serde_json::from_slice(&body)?;
    Ok(detail.document.id)
}

#[tokio::test]
async fn approval_materializes_a_grant() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("owner", "pass-word-1", "user").await?;
    app.insert_user("asker", "pass-word-2", "user").await?;
    let owner_token = app.login_token("owner", "pass-word-1").await?;
    let asker_token = app.login_token("asker", "pass-word-2").await?;

    let doc_id = upload(&app, &owner_token, "wanted.txt").await?;

    let response = app
        .post_json(
            &format!("/api/documents/{doc_id}/access-requests"),
            &json!({ "requested_level": "viewer", "message": "need this for audit" }),
            Some(&asker_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let request: RequestEntry = serde_json::from_slice(&body)?;
    assert_eq!(request.status, "pending");
    assert_eq!(request.requested_level, "viewer");

    // Only one pending request per document and requester.
    let response = app
        .post_json(
            &format!("/api/documents/{doc_id}/access-requests"),
            &json!({ "requested_level": "viewer" }),
            Some(&asker_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The owner sees it on the document queue.
    let response = app
        .get(
            &format!("/api/documents/{doc_id}/access-requests"),
            Some(&owner_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let queue: Vec<RequestEntry> = serde_json::from_slice(&body)?;
    assert_eq!(queue.len(), 1);

    let response = app
        .post_json(
            &format!("/api/access-requests/{}/approve", request.id),
            &json!({ "response_message": "granted for the audit" }),
            Some(&owner_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let decided: RequestEntry = serde_json::from_slice(&body)?;
    assert_eq!(decided.status, "approved");
    assert_eq!(
        decided.response_message.as_deref(),
        Some("granted for the audit")
    );

    // The requester can now read the document.
    let response = app
        .get(&format!("/api/documents/{doc_id}"), Some(&asker_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // Deciding twice is rejected.
    let response = app
        .post_json(
            &format!("/api/access-requests/{}/approve", request.id),
            &json!({}),
            Some(&owner_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn denial_leaves_document_hidden() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("owner", "pass-word-1", "user").await?;
    app.insert_user("asker", "pass-word-2", "user").await?;
    let owner_token = app.login_token("owner", "pass-word-1").await?;
    let asker_token = app.login_token("asker", "pass-word-2").await?;

    let doc_id = upload(&app, &owner_token, "refused.txt").await?;

    let response = app
        .post_json(
            &format!("/api/documents/{doc_id}/access-requests"),
            &json!({ "requested_level": "editor" }),
            Some(&asker_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let request: RequestEntry = serde_json::from_slice(&body)?;

    let response = app
        .post_json(
            &format!("/api/access-requests/{}/deny", request.id),
            &json!({ "response_message": "not for interns" }),
            Some(&owner_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let decided: RequestEntry = serde_json::from_slice(&body)?;
    assert_eq!(decided.status, "denied");

    let response = app
        .get(&format!("/api/documents/{doc_id}"), Some(&asker_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The requester sees the outcome in their own list.
    let response = app.get("/api/access-requests", Some(&asker_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let mine: Vec<RequestEntry> = serde_json::from_slice(&body)?;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].status, "denied");

    // Someone who is not the owner cannot decide.
    let doc2 = upload(&app, &owner_token, "second.txt").await?;
    let response = app
        .post_json(
            &format!("/api/documents/{doc2}/access-requests"),
            &json!({ "requested_level": "viewer" }),
            Some(&asker_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let request2: RequestEntry = serde_json::from_slice(&body)?;

    let response = app
        .post_json(
            &format!("/api/access-requests/{}/approve", request2.id),
            &json!({}),
            Some(&asker_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}
