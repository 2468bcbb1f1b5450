use diesel::{prelude::*, PgConnection};
use serde_json::Value;
use uuid::Uuid;

use crate::{error::AppResult, models::NewAuditLogEntry, schema::audit_log};

pub const ACTION_DOCUMENT_CREATED: &str = "DOCUMENT_CREATED";
pub const ACTION_DOCUMENT_UPDATED: &str = "DOCUMENT_UPDATED";
pub const ACTION_FILE_UPLOADED: &str = "FILE_UPLOADED";
pub const ACTION_REVIEW_SUBMITTED: &str = "REVIEW_SUBMITTED";
pub const ACTION_REVIEW_APPROVED: &str = "REVIEW_APPROVED";
pub const ACTION_CHANGES_REQUESTED: &str = "CHANGES_REQUESTED";
pub const ACTION_DOCUMENT_PUBLISHED: &str = "DOCUMENT_PUBLISHED";
pub const ACTION_VERSION_CREATED: &str = "VERSION_CREATED";
pub const ACTION_READ_CONFIRMED: &str = "READ_CONFIRMED";
pub const ACTION_USER_CREATED: &str = "USER_CREATED";
pub const ACTION_USER_UPDATED: &str = "USER_UPDATED";
pub const ACTION_USER_DEACTIVATED: &str = "USER_DEACTIVATED";
pub const ACTION_USER_REACTIVATED: &str = "USER_REACTIVATED";
pub const ACTION_AREA_CREATED: &str = "AREA_CREATED";
pub const ACTION_AREA_UPDATED: &str = "AREA_UPDATED";
pub const ACTION_AREA_DEACTIVATED: &str = "AREA_DEACTIVATED";
pub const ACTION_DOCUMENT_TYPE_CREATED: &str = "DOCUMENT_TYPE_CREATED";
pub const ACTION_DOCUMENT_TYPE_UPDATED: &str = "DOCUMENT_TYPE_UPDATED";
pub const ACTION_DOCUMENT_TYPE_DEACTIVATED: &str = "DOCUMENT_TYPE_DEACTIVATED";

pub const ENTITY_DOCUMENT: &str = "document";
pub const ENTITY_USER: &str = "user";
pub const ENTITY_AREA: &str = "area";
pub const ENTITY_DOCUMENT_TYPE: &str = "document_type";

/// Append-only. Called inside the same transaction as the change it
/// records.
pub fn record(
    conn: &mut PgConnection,
    actor_id: Option<Uuid>,
    action: &str,
    entity_type: &str,
    entity_id: Option<Uuid>,
    metadata: Value,
) -> AppResult<()> {
    let entry = NewAuditLogEntry {
        id: Uuid::new_v4(),
        user_id: actor_id,
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id,
        metadata,
    };

    diesel::insert_into(audit_log::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}
