use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{ok, ok_empty, AppError, AppResult, Envelope},
    models::Notification,
    schema::notifications,
    state::AppState,
};

use super::documents::to_iso;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationListQuery {
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub id: Uuid,
    pub document_id: Option<Uuid>,
    pub notification_type: String,
    pub message: String,
    pub created_at: String,
    pub read_at: Option<String>,
    pub archived_at: Option<String>,
}

impl From<Notification> for NotificationResponse {
    fn from(notification: Notification) -> Self {
        Self {
            id: notification.id,
            document_id: notification.document_id,
            notification_type: notification.notification_type,
            message: notification.message,
            created_at: to_iso(notification.created_at),
            read_at: notification.read_at.map(to_iso),
            archived_at: notification.archived_at.map(to_iso),
        }
    }
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<NotificationListQuery>,
) -> AppResult<Json<Envelope<Vec<NotificationResponse>>>> {
    let mut conn = state.db()?;

    let mut list_query = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .into_boxed();
    if !query.include_archived {
        list_query = list_query.filter(notifications::archived_at.is_null());
    }

    let rows: Vec<Notification> = list_query
        .order(notifications::created_at.desc())
        .load(&mut conn)?;

    Ok(ok(rows.into_iter().map(NotificationResponse::from).collect()))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<NotificationResponse>>> {
    let mut conn = state.db()?;
    let row = load_own(&mut conn, notification_id, user.user_id)?;

    // Re-reading an already-read notification keeps the original read time.
    let read_at = row.read_at.unwrap_or_else(|| Utc::now().naive_utc());
    let updated: Notification = diesel::update(notifications::table.find(row.id))
        .set(notifications::read_at.eq(Some(read_at)))
        .get_result(&mut conn)?;

    Ok(ok(updated.into()))
}

pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<Value>>> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let updated = diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::read_at.is_null()),
    )
    .set(notifications::read_at.eq(Some(now)))
    .execute(&mut conn)?;

    Ok(ok(json!({ "updated": updated })))
}

pub async fn archive_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<NotificationResponse>>> {
    let mut conn = state.db()?;
    let row = load_own(&mut conn, notification_id, user.user_id)?;

    let now = Utc::now().naive_utc();
    let updated: Notification = diesel::update(notifications::table.find(row.id))
        .set(notifications::archived_at.eq(Some(now)))
        .get_result(&mut conn)?;

    Ok(ok(updated.into()))
}

pub async fn restore_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<NotificationResponse>>> {
    let mut conn = state.db()?;
    let row = load_own(&mut conn, notification_id, user.user_id)?;

    let updated: Notification = diesel::update(notifications::table.find(row.id))
        .set(notifications::archived_at.eq(None::<chrono::NaiveDateTime>))
        .get_result(&mut conn)?;

    Ok(ok(updated.into()))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<()>>> {
    let mut conn = state.db()?;

    let deleted = diesel::delete(
        notifications::table
            .filter(notifications::id.eq(notification_id))
            .filter(notifications::user_id.eq(user.user_id)),
    )
    .execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    Ok(ok_empty())
}

/// Notifications are private: a foreign id behaves exactly like a missing
/// one.
fn load_own(
    conn: &mut PgConnection,
    notification_id: Uuid,
    user_id: Uuid,
) -> AppResult<Notification> {
    notifications::table
        .filter(notifications::id.eq(notification_id))
        .filter(notifications::user_id.eq(user_id))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)
}
