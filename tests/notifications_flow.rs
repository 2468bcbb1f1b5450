mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, decode_data, TestApp};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationInfo {
    id: Uuid,
    notification_type: String,
    read_at: Option<String>,
    archived_at: Option<String>,
}

#[derive(Deserialize)]
struct MarkAllResult {
    updated: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentInfo {
    id: Uuid,
}

/// Creates a document and submits it to `reviewer_id`, which lands one
/// REVIEW_REQUEST notification in the reviewer's inbox.
async fn notify_reviewer(
    app: &TestApp,
    manager: &str,
    title: &str,
    reviewer_id: Uuid,
) -> Result<()> {
    let response = app
        .post_json(
            "/documents",
            &json!({ "title": title, "documentType": "SOP", "area": "QA" }),
            Some(manager),
        )
        .await?;
    anyhow::ensure!(
        response.status() == StatusCode::CREATED,
        "create document failed with status {}",
        response.status()
    );
    let document: DocumentInfo = decode_data(response).await?;

    let submit = app
        .post_json(
            &format!("/documents/{}/submit-review", document.id),
            &json!({ "reviewers": [reviewer_id] }),
            Some(manager),
        )
        .await?;
    anyhow::ensure!(
        submit.status() == StatusCode::OK,
        "submit failed with status {}",
        submit.status()
    );
    Ok(())
}

async fn inbox(app: &TestApp, token: &str, path: &str) -> Result<Vec<NotificationInfo>> {
    let response = app.get(path, Some(token)).await?;
    anyhow::ensure!(
        response.status() == StatusCode::OK,
        "list notifications failed with status {}",
        response.status()
    );
    decode_data(response).await
}

#[tokio::test]
async fn read_archive_restore_delete_lifecycle() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let remy_id = app
        .insert_user("remy", "revpass", "REVIEWER", Some("QA"))
        .await?;
    let manager = app.login_token("mara", "qmpass").await?;
    let remy = app.login_token("remy", "revpass").await?;

    notify_reviewer(&app, &manager, "Cleaning Procedure", remy_id).await?;

    let notifications = inbox(&app, &remy, "/notifications").await?;
    assert_eq!(notifications.len(), 1);
    let notification = &notifications[0];
    assert_eq!(notification.notification_type, "REVIEW_REQUEST");
    assert!(notification.read_at.is_none());
    assert!(notification.archived_at.is_none());

    let response = app
        .patch_json(
            &format!("/notifications/{}/read", notification.id),
            &json!({}),
            Some(&remy),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let read: NotificationInfo = decode_data(response).await?;
    let first_read_at = read.read_at.clone();
    assert!(first_read_at.is_some());

    // Re-reading keeps the original timestamp.
    let response = app
        .patch_json(
            &format!("/notifications/{}/read", notification.id),
            &json!({}),
            Some(&remy),
        )
        .await?;
    let reread: NotificationInfo = decode_data(response).await?;
    assert_eq!(reread.read_at, first_read_at);

    let response = app
        .patch_json(
            &format!("/notifications/{}/archive", notification.id),
            &json!({}),
            Some(&remy),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // Archived notifications leave the default listing.
    let visible = inbox(&app, &remy, "/notifications").await?;
    assert!(visible.is_empty());
    let all = inbox(&app, &remy, "/notifications?includeArchived=true").await?;
    assert_eq!(all.len(), 1);
    assert!(all[0].archived_at.is_some());

    let response = app
        .patch_json(
            &format!("/notifications/{}/restore", notification.id),
            &json!({}),
            Some(&remy),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let visible = inbox(&app, &remy, "/notifications").await?;
    assert_eq!(visible.len(), 1);
    assert!(visible[0].archived_at.is_none());

    let response = app
        .delete(&format!("/notifications/{}", notification.id), Some(&remy))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let gone = inbox(&app, &remy, "/notifications?includeArchived=true").await?;
    assert!(gone.is_empty());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn mark_all_touches_only_unread_rows() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let remy_id = app
        .insert_user("remy", "revpass", "REVIEWER", Some("QA"))
        .await?;
    let manager = app.login_token("mara", "qmpass").await?;
    let remy = app.login_token("remy", "revpass").await?;

    notify_reviewer(&app, &manager, "First Procedure", remy_id).await?;
    notify_reviewer(&app, &manager, "Second Procedure", remy_id).await?;

    let response = app
        .post_json("/notifications/mark-all-read", &json!({}), Some(&remy))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let result: MarkAllResult = decode_data(response).await?;
    assert_eq!(result.updated, 2);

    let response = app
        .post_json("/notifications/mark-all-read", &json!({}), Some(&remy))
        .await?;
    let result: MarkAllResult = decode_data(response).await?;
    assert_eq!(result.updated, 0);

    let notifications = inbox(&app, &remy, "/notifications").await?;
    assert!(notifications.iter().all(|n| n.read_at.is_some()));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn foreign_notifications_look_missing() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_area("QA", "Quality Assurance").await?;
    app.insert_user("mara", "qmpass", "QUALITY_MANAGER", None)
        .await?;
    let remy_id = app
        .insert_user("remy", "revpass", "REVIEWER", Some("QA"))
        .await?;
    app.insert_user("rhea", "revpass", "REVIEWER", Some("QA"))
        .await?;
    let manager = app.login_token("mara", "qmpass").await?;
    let remy = app.login_token("remy", "revpass").await?;
    let rhea = app.login_token("rhea", "revpass").await?;

    notify_reviewer(&app, &manager, "Cleaning Procedure", remy_id).await?;
    let notifications = inbox(&app, &remy, "/notifications").await?;
    let foreign_id = notifications[0].id;

    let response = app
        .patch_json(
            &format!("/notifications/{foreign_id}/read"),
            &json!({}),
            Some(&rhea),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .delete(&format!("/notifications/{foreign_id}"), Some(&rhea))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The row is untouched for its owner.
    let still_there = inbox(&app, &remy, "/notifications").await?;
    assert_eq!(still_there.len(), 1);
    assert!(still_there[0].read_at.is_none());

    app.cleanup().await?;
    Ok(())
}
