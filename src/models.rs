use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Administrator,
    QualityManager,
    DocumentOwner,
    Reviewer,
    Approver,
    Reader,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Administrator => "ADMINISTRATOR",
            Role::QualityManager => "QUALITY_MANAGER",
            Role::DocumentOwner => "DOCUMENT_OWNER",
            Role::Reviewer => "REVIEWER",
            Role::Approver => "APPROVER",
            Role::Reader => "READER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ADMINISTRATOR" => Some(Role::Administrator),
            "QUALITY_MANAGER" => Some(Role::QualityManager),
            "DOCUMENT_OWNER" => Some(Role::DocumentOwner),
            "REVIEWER" => Some(Role::Reviewer),
            "APPROVER" => Some(Role::Approver),
            "READER" => Some(Role::Reader),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    InReview,
    // Reserved for a dedicated approval step; no transition currently
    // produces or consumes it.
    Approved,
    Published,
    Obsolete,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::InReview => "IN_REVIEW",
            DocumentStatus::Approved => "APPROVED",
            DocumentStatus::Published => "PUBLISHED",
            DocumentStatus::Obsolete => "OBSOLETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DRAFT" => Some(DocumentStatus::Draft),
            "IN_REVIEW" => Some(DocumentStatus::InReview),
            "APPROVED" => Some(DocumentStatus::Approved),
            "PUBLISHED" => Some(DocumentStatus::Published),
            "OBSOLETE" => Some(DocumentStatus::Obsolete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewTaskStatus {
    Pending,
    Approved,
    ChangesRequested,
}

impl ReviewTaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewTaskStatus::Pending => "PENDING",
            ReviewTaskStatus::Approved => "APPROVED",
            ReviewTaskStatus::ChangesRequested => "CHANGES_REQUESTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(ReviewTaskStatus::Pending),
            "APPROVED" => Some(ReviewTaskStatus::Approved),
            "CHANGES_REQUESTED" => Some(ReviewTaskStatus::ChangesRequested),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub area: Option<String>,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub area: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = areas)]
pub struct Area {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = areas)]
pub struct NewArea {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = document_types)]
pub struct DocumentType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub prefix: String,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_types)]
pub struct NewDocumentType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub document_type: String,
    pub area: String,
    pub status: String,
    pub current_version: String,
    pub has_file: bool,
    pub created_by: Uuid,
    pub updated_by: Option<Uuid>,
    pub reviewed_by: Option<Uuid>,
    pub published_at: Option<NaiveDateTime>,
    pub next_review_date: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub document_type: String,
    pub area: String,
    pub status: String,
    pub current_version: String,
    pub created_by: Uuid,
    pub next_review_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_versions)]
#[diesel(belongs_to(Document))]
pub struct DocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_label: String,
    pub status: String,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub storage_key: Option<String>,
    pub checksum: Option<String>,
    pub change_notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_versions)]
pub struct NewDocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_label: String,
    pub status: String,
    pub change_notes: Option<String>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = review_tasks)]
#[diesel(belongs_to(Document))]
pub struct ReviewTask {
    pub id: Uuid,
    pub document_id: Uuid,
    pub reviewer_id: Uuid,
    pub status: String,
    pub comments: Option<String>,
    pub assigned_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = review_tasks)]
pub struct NewReviewTask {
    pub id: Uuid,
    pub document_id: Uuid,
    pub reviewer_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = read_confirmations)]
pub struct ReadConfirmation {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub confirmed_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = read_confirmations)]
pub struct NewReadConfirmation {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub confirmed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub document_id: Option<Uuid>,
    pub notification_type: String,
    pub message: String,
    pub created_at: NaiveDateTime,
    pub read_at: Option<NaiveDateTime>,
    pub archived_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub document_id: Option<Uuid>,
    pub notification_type: String,
    pub message: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = audit_log)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = audit_log)]
pub struct NewAuditLogEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
