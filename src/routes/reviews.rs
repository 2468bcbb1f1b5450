use axum::{extract::State, Json};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{ok, AppResult, Envelope},
    models::{ReviewTask, ReviewTaskStatus},
    policy,
    schema::{documents, review_tasks},
    state::AppState,
};

use super::documents::to_iso;

/// A pending task joined with just enough document context for a work list.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReviewResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub document_code: String,
    pub document_title: String,
    pub document_version: String,
    pub assigned_at: String,
}

pub async fn list_pending_reviews(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<Vec<PendingReviewResponse>>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;

    let rows: Vec<(ReviewTask, (String, String, String))> = review_tasks::table
        .inner_join(documents::table)
        .filter(review_tasks::reviewer_id.eq(actor.id))
        .filter(review_tasks::status.eq(ReviewTaskStatus::Pending.as_str()))
        .order(review_tasks::assigned_at.asc())
        .select((
            review_tasks::all_columns,
            (
                documents::code,
                documents::title,
                documents::current_version,
            ),
        ))
        .load(&mut conn)?;

    let pending = rows
        .into_iter()
        .map(|(task, (code, title, version))| PendingReviewResponse {
            id: task.id,
            document_id: task.document_id,
            document_code: code,
            document_title: title,
            document_version: version,
            assigned_at: to_iso(task.assigned_at),
        })
        .collect();

    Ok(ok(pending))
}
