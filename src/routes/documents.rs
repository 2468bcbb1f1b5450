use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    audit,
    auth::AuthenticatedUser,
    error::{ok, AppError, AppResult, Envelope},
    models::{Document, DocumentVersion, ReadConfirmation, ReviewTask},
    policy,
    schema::{document_versions, documents, review_tasks, users},
    state::AppState,
    utils::json::{classify_nullable, ApiJson, NullableValue},
    workflow::{self, CreateDocumentInput, ReviewDecision},
};

pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// PDF, DOCX, XLSX. Everything else is rejected at the door.
pub const ALLOWED_UPLOAD_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

fn attachment_content_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentListQuery {
    pub status: Option<String>,
    pub document_type: Option<String>,
    pub area: Option<String>,
    pub search: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    pub title: String,
    pub description: Option<String>,
    pub document_type: String,
    pub area: String,
    pub next_review_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct SubmitReviewRequest {
    pub reviewers: Vec<Uuid>,
    pub comments: Option<String>,
}

#[derive(Deserialize)]
pub struct ReviewDecisionRequest {
    pub action: ReviewDecision,
    pub comments: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVersionRequest {
    pub change_notes: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
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
    pub published_at: Option<String>,
    pub next_review_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        Self {
            id: document.id,
            code: document.code,
            title: document.title,
            description: document.description,
            document_type: document.document_type,
            area: document.area,
            status: document.status,
            current_version: document.current_version,
            has_file: document.has_file,
            created_by: document.created_by,
            updated_by: document.updated_by,
            reviewed_by: document.reviewed_by,
            published_at: document.published_at.map(to_iso),
            next_review_date: document.next_review_date.map(|d| d.to_string()),
            created_at: to_iso(document.created_at),
            updated_at: to_iso(document.updated_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentVersionResponse {
    pub id: Uuid,
    pub version_label: String,
    pub status: String,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub checksum: Option<String>,
    pub change_notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: String,
}

impl From<DocumentVersion> for DocumentVersionResponse {
    fn from(version: DocumentVersion) -> Self {
        Self {
            id: version.id,
            version_label: version.version_label,
            status: version.status,
            file_name: version.file_name,
            file_size: version.file_size,
            mime_type: version.mime_type,
            checksum: version.checksum,
            change_notes: version.change_notes,
            created_by: version.created_by,
            created_at: to_iso(version.created_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewTaskResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub reviewer_id: Uuid,
    pub reviewer_username: String,
    pub status: String,
    pub comments: Option<String>,
    pub assigned_at: String,
    pub completed_at: Option<String>,
}

fn to_task_response(task: ReviewTask, reviewer_username: String) -> ReviewTaskResponse {
    ReviewTaskResponse {
        id: task.id,
        document_id: task.document_id,
        reviewer_id: task.reviewer_id,
        reviewer_username,
        status: task.status,
        comments: task.comments,
        assigned_at: to_iso(task.assigned_at),
        completed_at: task.completed_at.map(to_iso),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadConfirmationResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub confirmed_at: String,
}

impl From<ReadConfirmation> for ReadConfirmationResponse {
    fn from(confirmation: ReadConfirmation) -> Self {
        Self {
            id: confirmation.id,
            document_id: confirmation.document_id,
            user_id: confirmation.user_id,
            confirmed_at: to_iso(confirmation.confirmed_at),
        }
    }
}

pub async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<CreateDocumentRequest>,
) -> AppResult<(StatusCode, Json<Envelope<DocumentResponse>>)> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;
    ensure_author(&actor)?;

    let document = workflow::create_document(
        &mut conn,
        &actor,
        CreateDocumentInput {
            title: payload.title,
            description: payload.description,
            document_type: payload.document_type,
            area: payload.area,
            next_review_date: payload.next_review_date,
        },
    )?;

    info!(document_id = %document.id, code = %document.code, "document created");
    Ok((StatusCode::CREATED, ok(document.into())))
}

pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<DocumentListQuery>,
) -> AppResult<Json<Envelope<Vec<DocumentResponse>>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;

    let mut docs_query = documents::table.into_boxed();

    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status = crate::models::DocumentStatus::parse(status)
            .ok_or_else(|| AppError::bad_request(format!("unknown status {status}")))?;
        docs_query = docs_query.filter(documents::status.eq(status.as_str()));
    }

    if let Some(document_type) = query.document_type.as_deref().filter(|t| !t.is_empty()) {
        docs_query = docs_query.filter(documents::document_type.eq(document_type.to_string()));
    }

    // Area-bound actors are pinned to their own area whatever they asked for.
    match policy::forced_area_scope(&actor) {
        Some(area) => {
            docs_query = docs_query.filter(documents::area.eq(area.to_string()));
        }
        None => {
            if let Some(area) = query.area.as_deref().filter(|a| !a.is_empty()) {
                docs_query = docs_query.filter(documents::area.eq(area.to_string()));
            }
        }
    }

    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        docs_query = docs_query.filter(
            documents::title
                .ilike(pattern.clone())
                .or(documents::code.ilike(pattern)),
        );
    }

    let rows: Vec<Document> = docs_query
        .order(documents::updated_at.desc())
        .load(&mut conn)?;

    Ok(ok(rows.into_iter().map(DocumentResponse::from).collect()))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<DocumentResponse>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    policy::ensure_document_access(&mut conn, &actor, document.id, &document.area)?;

    Ok(ok(document.into()))
}

pub async fn update_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<Json<Envelope<DocumentResponse>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;
    ensure_author(&actor)?;

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    policy::ensure_document_access(&mut conn, &actor, document.id, &document.area)?;

    let mut changeset = DocumentChangeset {
        title: None,
        description: None,
        next_review_date: None,
        updated_by: Some(actor.id),
        updated_at: Utc::now().naive_utc(),
    };

    match classify_nullable(payload.get("title")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => {}
        NullableValue::Null => return Err(AppError::bad_request("title cannot be null")),
        NullableValue::String(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("title must not be empty"));
            }
            changeset.title = Some(trimmed);
        }
    }

    match classify_nullable(payload.get("description")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => {}
        NullableValue::Null => changeset.description = Some(None),
        NullableValue::String(value) => changeset.description = Some(Some(value)),
    }

    match payload.get("nextReviewDate") {
        None => {}
        Some(Value::Null) => changeset.next_review_date = Some(None),
        Some(Value::String(value)) => {
            let parsed = value
                .parse::<NaiveDate>()
                .map_err(|_| AppError::bad_request("nextReviewDate must be YYYY-MM-DD"))?;
            changeset.next_review_date = Some(Some(parsed));
        }
        Some(other) => {
            return Err(AppError::bad_request(format!(
                "expected date string or null, got {other}"
            )))
        }
    }

    if changeset.title.is_none()
        && changeset.description.is_none()
        && changeset.next_review_date.is_none()
    {
        return Err(AppError::bad_request("no changes provided"));
    }

    let updated: Document = conn.transaction::<_, AppError, _>(|conn| {
        let row: Document = diesel::update(documents::table.find(document_id))
            .set(&changeset)
            .get_result(conn)?;
        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_DOCUMENT_UPDATED,
            audit::ENTITY_DOCUMENT,
            Some(document_id),
            json!({ "code": row.code }),
        )?;
        Ok(row)
    })?;

    Ok(ok(updated.into()))
}

pub async fn upload_document_file(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<Json<Envelope<DocumentVersionResponse>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;
    ensure_author(&actor)?;

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    policy::ensure_document_access(&mut conn, &actor, document.id, &document.area)?;
    drop(conn);

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        let msg = format!("invalid multipart data: {err}");
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(msg)
    })? {
        let name = field.name().map(|n| n.to_string());
        if name.as_deref() == Some("file") {
            original_name = field.file_name().map(|n| n.to_string());
            content_type = field.content_type().map(|mime| mime.to_string());
            let data = field.bytes().await.map_err(|err| {
                let msg = format!("failed to read file bytes: {err}");
                error!(error = %err, "failed to read file bytes");
                AppError::bad_request(msg)
            })?;
            file_bytes = Some(data.to_vec());
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if file_bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    if file_bytes.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::bad_request("file exceeds the 50 MB limit"));
    }
    let original_name =
        original_name.ok_or_else(|| AppError::bad_request("filename is required"))?;

    let mime_type = content_type
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| {
            mime_guess::from_path(&original_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
    if !ALLOWED_UPLOAD_MIME_TYPES.contains(&mime_type.as_str()) {
        return Err(AppError::bad_request(format!(
            "unsupported file type {mime_type}; allowed: PDF, DOCX, XLSX"
        )));
    }

    let checksum = hex::encode(Sha256::digest(&file_bytes));
    let file_size = file_bytes.len() as i64;

    let mut conn = state.db()?;
    let version: DocumentVersion = document_versions::table
        .filter(document_versions::document_id.eq(document_id))
        .filter(document_versions::version_label.eq(&document.current_version))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| {
            AppError::internal(format!(
                "document {document_id} has no row for current version {}",
                document.current_version
            ))
        })?;
    let previous_key = version.storage_key.clone();
    drop(conn);

    let storage_key = format!(
        "documents/{}/{}/{}",
        document_id, version.version_label, version.id
    );
    state
        .storage
        .put_object(&storage_key, file_bytes, &mime_type)
        .await
        .map_err(|err| {
            error!(error = %err, key = %storage_key, "failed to store document file");
            AppError::internal(format!("failed to store document file: {err}"))
        })?;

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let updated: DocumentVersion = conn.transaction::<_, AppError, _>(|conn| {
        let row: DocumentVersion = diesel::update(document_versions::table.find(version.id))
            .set((
                document_versions::file_name.eq(Some(original_name.clone())),
                document_versions::file_size.eq(Some(file_size)),
                document_versions::mime_type.eq(Some(mime_type.clone())),
                document_versions::storage_key.eq(Some(storage_key.clone())),
                document_versions::checksum.eq(Some(checksum.clone())),
            ))
            .get_result(conn)?;

        diesel::update(documents::table.find(document_id))
            .set((
                documents::has_file.eq(true),
                documents::updated_by.eq(Some(actor.id)),
                documents::updated_at.eq(now),
            ))
            .execute(conn)?;

        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_FILE_UPLOADED,
            audit::ENTITY_DOCUMENT,
            Some(document_id),
            json!({
                "code": document.code,
                "version": row.version_label,
                "fileName": original_name,
                "fileSize": file_size,
                "checksum": checksum,
            }),
        )?;
        Ok(row)
    })?;

    // The replaced blob is unreferenced once the new key is committed.
    if let Some(old_key) = previous_key.filter(|key| key != &storage_key) {
        if let Err(err) = state.storage.delete_object(&old_key).await {
            warn!(error = %err, key = %old_key, "failed to delete replaced file");
        }
    }

    info!(document_id = %document_id, size = file_size, "file uploaded");
    Ok(ok(updated.into()))
}

pub async fn download_document_file(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Response> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    policy::ensure_document_access(&mut conn, &actor, document.id, &document.area)?;

    let version: DocumentVersion = document_versions::table
        .filter(document_versions::document_id.eq(document_id))
        .filter(document_versions::version_label.eq(&document.current_version))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    drop(conn);

    let storage_key = version.storage_key.ok_or_else(AppError::not_found)?;
    let bytes = state.storage.get_object(&storage_key).await.map_err(|err| {
        error!(error = %err, key = %storage_key, "failed to fetch document file");
        AppError::internal(format!("failed to fetch document file: {err}"))
    })?;

    let filename = version
        .file_name
        .unwrap_or_else(|| format!("{}.bin", document.code));
    let content_type = version
        .mime_type
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(
            header::CONTENT_DISPOSITION,
            attachment_content_disposition(&filename),
        )
        .body(Body::from(bytes))
        .map_err(|err| AppError::internal(format!("failed to build response: {err}")))
}

pub async fn submit_for_review(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<SubmitReviewRequest>,
) -> AppResult<Json<Envelope<DocumentResponse>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;
    ensure_author(&actor)?;

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    policy::ensure_document_access(&mut conn, &actor, document.id, &document.area)?;

    let document = workflow::submit_for_review(
        &mut conn,
        &actor,
        document_id,
        payload.reviewers,
        payload.comments,
    )?;

    info!(document_id = %document_id, "document submitted for review");
    Ok(ok(document.into()))
}

pub async fn decide_review(
    State(state): State<AppState>,
    Path((document_id, task_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<ReviewDecisionRequest>,
) -> AppResult<Json<Envelope<ReviewTaskResponse>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    policy::ensure_document_access(&mut conn, &actor, document.id, &document.area)?;

    let task = workflow::decide_review(
        &mut conn,
        &actor,
        document_id,
        task_id,
        payload.action,
        payload.comments,
    )?;

    info!(document_id = %document_id, task_id = %task_id, "review decided");
    Ok(ok(to_task_response(task, user.username)))
}

pub async fn publish_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<DocumentResponse>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;
    ensure_publisher(&actor)?;

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    policy::ensure_document_access(&mut conn, &actor, document.id, &document.area)?;

    let document = workflow::publish_document(&mut conn, &actor, document_id)?;

    info!(document_id = %document_id, code = %document.code, "document published");
    Ok(ok(document.into()))
}

pub async fn start_new_version(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<NewVersionRequest>,
) -> AppResult<Json<Envelope<DocumentResponse>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;
    ensure_author(&actor)?;

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    policy::ensure_document_access(&mut conn, &actor, document.id, &document.area)?;

    let document =
        workflow::start_new_version(&mut conn, &actor, document_id, payload.change_notes)?;

    info!(document_id = %document_id, version = %document.current_version, "new version started");
    Ok(ok(document.into()))
}

pub async fn confirm_read(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<ReadConfirmationResponse>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    policy::ensure_document_access(&mut conn, &actor, document.id, &document.area)?;

    let confirmation = workflow::confirm_read(&mut conn, &actor, document_id)?;
    Ok(ok(confirmation.into()))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<Vec<DocumentVersionResponse>>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    policy::ensure_document_access(&mut conn, &actor, document.id, &document.area)?;

    let versions: Vec<DocumentVersion> = document_versions::table
        .filter(document_versions::document_id.eq(document_id))
        .order(document_versions::created_at.asc())
        .load(&mut conn)?;

    Ok(ok(versions
        .into_iter()
        .map(DocumentVersionResponse::from)
        .collect()))
}

pub async fn list_reviews(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<Vec<ReviewTaskResponse>>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;

    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    policy::ensure_document_access(&mut conn, &actor, document.id, &document.area)?;

    let rows: Vec<(ReviewTask, String)> = review_tasks::table
        .inner_join(users::table)
        .filter(review_tasks::document_id.eq(document_id))
        .order(review_tasks::assigned_at.asc())
        .select((review_tasks::all_columns, users::username))
        .load(&mut conn)?;

    Ok(ok(rows
        .into_iter()
        .map(|(task, username)| to_task_response(task, username))
        .collect()))
}

#[derive(AsChangeset)]
#[diesel(table_name = documents)]
struct DocumentChangeset {
    title: Option<String>,
    description: Option<Option<String>>,
    next_review_date: Option<Option<NaiveDate>>,
    updated_by: Option<Uuid>,
    updated_at: NaiveDateTime,
}

fn ensure_author(actor: &policy::Actor) -> AppResult<()> {
    if !policy::can_author(actor.role) {
        return Err(AppError::forbidden("insufficient role for authoring"));
    }
    Ok(())
}

fn ensure_publisher(actor: &policy::Actor) -> AppResult<()> {
    if !policy::can_publish(actor.role) {
        return Err(AppError::forbidden("insufficient role for publishing"));
    }
    Ok(())
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::attachment_content_disposition;

    #[test]
    fn disposition_encodes_and_sanitizes() {
        let value = attachment_content_disposition("report \"v1\".pdf");
        assert!(value.starts_with("attachment; filename=\"report _v1_.pdf\""));
        assert!(value.contains("filename*=UTF-8''"));
    }

    #[test]
    fn disposition_percent_encodes_unicode() {
        let value = attachment_content_disposition("protokoll-arbeitsanweisung ä.pdf");
        assert!(value.contains("%C3%A4"));
    }
}
