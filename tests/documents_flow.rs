mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Datelike, Utc};
use common::{acquire_db_lock, body_to_vec, decode_data, decode_error, TestApp};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentInfo {
    id: Uuid,
    code: String,
    title: String,
    description: Option<String>,
    document_type: String,
    area: String,
    status: String,
    current_version: String,
    has_file: bool,
    next_review_date: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    version_label: String,
    status: String,
    file_name: Option<String>,
    file_size: Option<i64>,
    mime_type: Option<String>,
    checksum: Option<String>,
}

async fn create_document(
    app: &TestApp,
    token: &str,
    title: &str,
    document_type: &str,
    area: &str,
) -> Result<DocumentInfo> {
    let response = app
        .post_json(
            "/documents",
            &json!({ "title": title, "documentType": document_type, "area": area }),
            Some(token),
        )
        .await?;
    anyhow::ensure!(
        response.status() == StatusCode::CREATED,
        "create document failed with status {}",
        response.status()
    );
    decode_data(response).await
}

#[tokio::test]
async fn create_document_allocates_sequential_codes() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let token = app.login_token("mara", "qmpass").await?;

    let year = Utc::now().year();
    let first = create_document(&app, &token, "Cleaning Procedure", "SOP", "QA").await?;
    let second = create_document(&app, &token, "Calibration Procedure", "SOP", "QA").await?;

    assert_eq!(first.code, format!("SOP-{year}-0001"));
    assert_eq!(second.code, format!("SOP-{year}-0002"));
    assert_ne!(first.id, second.id);
    assert_eq!(first.status, "DRAFT");
    assert_eq!(first.current_version, "v1.0");
    assert!(!first.has_file);

    let versions = app
        .get(&format!("/documents/{}/versions", first.id), Some(&token))
        .await?;
    assert_eq!(versions.status(), StatusCode::OK);
    let versions: Vec<VersionInfo> = decode_data(versions).await?;
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version_label, "v1.0");
    assert_eq!(versions[0].status, "DRAFT");
    assert!(versions[0].file_name.is_none());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn registered_type_prefix_overrides_the_derived_one() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_document_type("QUALITY_AGREEMENT", "Quality Agreement", "QAG")
        .await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let token = app.login_token("mara", "qmpass").await?;

    let year = Utc::now().year();
    let document = create_document(&app, &token, "Supplier Agreement", "QUALITY_AGREEMENT", "QA")
        .await?;
    assert_eq!(document.code, format!("QAG-{year}-0001"));
    assert_eq!(document.document_type, "QUALITY_AGREEMENT");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn create_document_requires_a_known_area() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let token = app.login_token("mara", "qmpass").await?;

    let response = app
        .post_json(
            "/documents",
            &json!({ "title": "Orphan", "documentType": "SOP", "area": "NOWHERE" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = decode_error(response).await?;
    assert!(error.contains("does not exist"), "unexpected error: {error}");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn create_document_requires_a_type_label() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let token = app.login_token("mara", "qmpass").await?;

    let response = app
        .post_json(
            "/documents",
            &json!({ "title": "Untyped", "documentType": "   ", "area": "QA" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = decode_error(response).await?;
    assert!(error.contains("document type"), "unexpected error: {error}");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn readers_cannot_author_documents() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_user("rita", "readpass", "READER", Some("QA"))
        .await?;
    let token = app.login_token("rita", "readpass").await?;

    let response = app
        .post_json(
            "/documents",
            &json!({ "title": "Nope", "documentType": "SOP", "area": "QA" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn listing_is_pinned_to_the_actor_area() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_area("PROD", "Production").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    app.insert_user("rita", "readpass", "READER", Some("QA"))
        .await?;
    let manager = app.login_token("mara", "qmpass").await?;
    let reader = app.login_token("rita", "readpass").await?;

    create_document(&app, &manager, "QA Procedure", "SOP", "QA").await?;
    create_document(&app, &manager, "Line Setup", "SOP", "PROD").await?;

    let all = app.get("/documents", Some(&manager)).await?;
    let all: Vec<DocumentInfo> = decode_data(all).await?;
    assert_eq!(all.len(), 2);

    let scoped = app.get("/documents", Some(&reader)).await?;
    let scoped: Vec<DocumentInfo> = decode_data(scoped).await?;
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].area, "QA");

    // Asking for another area does not widen the scope.
    let forced = app.get("/documents?area=PROD", Some(&reader)).await?;
    let forced: Vec<DocumentInfo> = decode_data(forced).await?;
    assert_eq!(forced.len(), 1);
    assert_eq!(forced[0].area, "QA");

    let by_search = app.get("/documents?search=line", Some(&manager)).await?;
    let by_search: Vec<DocumentInfo> = decode_data(by_search).await?;
    assert_eq!(by_search.len(), 1);
    assert_eq!(by_search[0].title, "Line Setup");

    let bad_status = app.get("/documents?status=BOGUS", Some(&manager)).await?;
    assert_eq!(bad_status.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn patch_distinguishes_absent_from_null() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let token = app.login_token("mara", "qmpass").await?;
    let document = create_document(&app, &token, "Draft Title", "SOP", "QA").await?;
    let path = format!("/documents/{}", document.id);

    let response = app
        .patch_json(
            &path,
            &json!({ "description": "first pass", "nextReviewDate": "2030-01-15" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated: DocumentInfo = decode_data(response).await?;
    assert_eq!(updated.title, "Draft Title");
    assert_eq!(updated.description.as_deref(), Some("first pass"));
    assert!(updated
        .next_review_date
        .as_deref()
        .is_some_and(|date| date.starts_with("2030-01-15")));

    // Null clears nullable fields; an absent key leaves them alone.
    let response = app
        .patch_json(
            &path,
            &json!({ "title": "Final Title", "description": null }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated: DocumentInfo = decode_data(response).await?;
    assert_eq!(updated.title, "Final Title");
    assert_eq!(updated.description, None);
    assert!(updated.next_review_date.is_some());

    let response = app
        .patch_json(&path, &json!({ "nextReviewDate": null }), Some(&token))
        .await?;
    let updated: DocumentInfo = decode_data(response).await?;
    assert_eq!(updated.next_review_date, None);

    let null_title = app
        .patch_json(&path, &json!({ "title": null }), Some(&token))
        .await?;
    assert_eq!(null_title.status(), StatusCode::BAD_REQUEST);

    let bad_date = app
        .patch_json(&path, &json!({ "nextReviewDate": "soon" }), Some(&token))
        .await?;
    assert_eq!(bad_date.status(), StatusCode::BAD_REQUEST);

    let empty = app.patch_json(&path, &json!({}), Some(&token)).await?;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn upload_rejects_unsupported_types() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let token = app.login_token("mara", "qmpass").await?;
    let document = create_document(&app, &token, "Procedure", "SOP", "QA").await?;

    let response = app
        .upload_file(
            &format!("/documents/{}/upload", document.id),
            "script.sh",
            "text/x-shellscript",
            b"#!/bin/sh\n",
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = decode_error(response).await?;
    assert!(
        error.contains("unsupported file type"),
        "unexpected error: {error}"
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn upload_rejects_files_over_the_limit() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let token = app.login_token("mara", "qmpass").await?;
    let document = create_document(&app, &token, "Procedure", "SOP", "QA").await?;

    let oversized = vec![0u8; 50 * 1024 * 1024 + 1];
    let response = app
        .upload_file(
            &format!("/documents/{}/upload", document.id),
            "huge.pdf",
            "application/pdf",
            &oversized,
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = decode_error(response).await?;
    assert!(error.contains("50 MB"), "unexpected error: {error}");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn upload_and_download_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let token = app.login_token("mara", "qmpass").await?;
    let document = create_document(&app, &token, "Procedure", "SOP", "QA").await?;

    let file_bytes = b"%PDF-1.4 fake procedure body".to_vec();
    let response = app
        .upload_file(
            &format!("/documents/{}/upload", document.id),
            "procedure.pdf",
            "application/pdf",
            &file_bytes,
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let version: VersionInfo = decode_data(response).await?;
    assert_eq!(version.version_label, "v1.0");
    assert_eq!(version.file_name.as_deref(), Some("procedure.pdf"));
    assert_eq!(version.file_size, Some(file_bytes.len() as i64));
    assert_eq!(version.mime_type.as_deref(), Some("application/pdf"));
    assert_eq!(
        version.checksum.as_deref(),
        Some(hex::encode(Sha256::digest(&file_bytes)).as_str())
    );
    assert_eq!(app.storage().object_count().await, 1);

    let refreshed = app
        .get(&format!("/documents/{}", document.id), Some(&token))
        .await?;
    let refreshed: DocumentInfo = decode_data(refreshed).await?;
    assert!(refreshed.has_file);

    let download = app
        .get(&format!("/documents/{}/download", document.id), Some(&token))
        .await?;
    assert_eq!(download.status(), StatusCode::OK);
    let content_type = download
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let disposition = download
        .headers()
        .get("content-disposition")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    assert_eq!(content_type.as_deref(), Some("application/pdf"));
    let disposition = disposition.unwrap_or_default();
    assert!(
        disposition.starts_with("attachment;") && disposition.contains("procedure.pdf"),
        "unexpected disposition: {disposition}"
    );
    let body = body_to_vec(download.into_body()).await?;
    assert_eq!(body, file_bytes);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn download_without_a_file_is_not_found() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let token = app.login_token("mara", "qmpass").await?;
    let document = create_document(&app, &token, "Procedure", "SOP", "QA").await?;

    let download = app
        .get(&format!("/documents/{}/download", document.id), Some(&token))
        .await?;
    assert_eq!(download.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn foreign_area_documents_are_forbidden() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_area("PROD", "Production").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    app.insert_user("rita", "readpass", "READER", Some("QA"))
        .await?;
    let manager = app.login_token("mara", "qmpass").await?;
    let reader = app.login_token("rita", "readpass").await?;

    let document = create_document(&app, &manager, "Line Setup", "SOP", "PROD").await?;

    let response = app
        .get(&format!("/documents/{}", document.id), Some(&reader))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn a_review_task_grants_access_across_areas() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_area("PROD", "Production").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let reviewer_id = app
        .insert_user("remy", "revpass", "REVIEWER", Some("QA"))
        .await?;
    let manager = app.login_token("mara", "qmpass").await?;
    let reviewer = app.login_token("remy", "revpass").await?;

    let document = create_document(&app, &manager, "Line Setup", "SOP", "PROD").await?;

    let blocked = app
        .get(&format!("/documents/{}", document.id), Some(&reviewer))
        .await?;
    assert_eq!(blocked.status(), StatusCode::FORBIDDEN);

    let submit = app
        .post_json(
            &format!("/documents/{}/submit-review", document.id),
            &json!({ "reviewers": [reviewer_id] }),
            Some(&manager),
        )
        .await?;
    assert_eq!(submit.status(), StatusCode::OK);

    let granted = app
        .get(&format!("/documents/{}", document.id), Some(&reviewer))
        .await?;
    assert_eq!(granted.status(), StatusCode::OK);
    let seen: DocumentInfo = decode_data(granted).await?;
    assert_eq!(seen.id, document.id);

    app.cleanup().await?;
    Ok(())
}
