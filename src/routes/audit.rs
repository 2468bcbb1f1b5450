use axum::{
    extract::{Query, State},
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{ok, AppError, AppResult, Envelope},
    models::AuditLogEntry,
    policy,
    schema::audit_log,
    state::AppState,
};

use super::documents::to_iso;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditListQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub action: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntryResponse {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub metadata: Value,
    pub created_at: String,
}

impl From<AuditLogEntry> for AuditEntryResponse {
    fn from(entry: AuditLogEntry) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user_id,
            action: entry.action,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            metadata: entry.metadata,
            created_at: to_iso(entry.created_at),
        }
    }
}

pub async fn list_audit_entries(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<AuditListQuery>,
) -> AppResult<Json<Envelope<Vec<AuditEntryResponse>>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;
    if !policy::is_privileged(actor.role) {
        return Err(AppError::forbidden("audit log requires a privileged role"));
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut log_query = audit_log::table.into_boxed();
    if let Some(entity_type) = query.entity_type.as_deref().filter(|t| !t.is_empty()) {
        log_query = log_query.filter(audit_log::entity_type.eq(entity_type.to_string()));
    }
    if let Some(entity_id) = query.entity_id {
        log_query = log_query.filter(audit_log::entity_id.eq(entity_id));
    }
    if let Some(action) = query.action.as_deref().filter(|a| !a.is_empty()) {
        log_query = log_query.filter(audit_log::action.eq(action.to_string()));
    }

    let rows: Vec<AuditLogEntry> = log_query
        .order(audit_log::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(ok(rows.into_iter().map(AuditEntryResponse::from).collect()))
}
