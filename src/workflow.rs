//! Document lifecycle operations. Each operation runs as one transaction:
//! registry and ledger updates, notifications, audit entries and outbox
//! jobs either all commit or none do. Emails themselves are delivered
//! asynchronously by the worker draining the outbox.

use chrono::{Datelike, NaiveDate, Utc};
use diesel::{prelude::*, result::DatabaseErrorKind, PgConnection};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit,
    codes::{self, MAX_CODE_ATTEMPTS},
    error::{AppError, AppResult},
    jobs,
    models::{
        Document, DocumentStatus, NewDocument, NewDocumentVersion, NewReadConfirmation,
        NewReviewTask, ReadConfirmation, ReviewTask, ReviewTaskStatus, Role, User,
    },
    notifications,
    policy::Actor,
    schema::{areas, document_versions, documents, read_confirmations, review_tasks, users},
};

pub const INITIAL_VERSION_LABEL: &str = "v1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approve,
    RequestChanges,
}

pub struct CreateDocumentInput {
    pub title: String,
    pub description: Option<String>,
    pub document_type: String,
    pub area: String,
    pub next_review_date: Option<NaiveDate>,
}

/// Major-increment of a `v{MAJOR}.{MINOR}` label. Labels that do not
/// match the pattern roll over to `v2.0`; that fallback is documented
/// behavior, not an error.
pub fn next_version_label(current: &str) -> String {
    let parsed = current
        .strip_prefix('v')
        .and_then(|rest| rest.split_once('.'))
        .and_then(|(major, minor)| {
            let major: u32 = major.parse().ok()?;
            let _: u32 = minor.parse().ok()?;
            Some(major)
        });

    match parsed {
        Some(major) => format!("v{}.0", major + 1),
        None => "v2.0".to_string(),
    }
}

pub fn create_document(
    conn: &mut PgConnection,
    actor: &Actor,
    input: CreateDocumentInput,
) -> AppResult<Document> {
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    let document_type = input.document_type.trim().to_string();
    if document_type.is_empty() {
        return Err(AppError::bad_request("document type must not be empty"));
    }
    let area = input.area.trim().to_string();
    if area.is_empty() {
        return Err(AppError::bad_request("area must not be empty"));
    }

    conn.transaction::<Document, AppError, _>(|conn| {
        ensure_area_exists(conn, &area)?;

        let prefix = codes::resolve_prefix(conn, &document_type)?;
        let existing_of_type: i64 = documents::table
            .filter(documents::document_type.eq(&document_type))
            .count()
            .get_result(conn)?;
        let base_sequence = existing_of_type + 1;
        let year = Utc::now().year();

        // The unique index on documents.code is the arbiter: insert the
        // candidate and walk forward on conflict instead of pre-checking.
        let mut attempt: u32 = 0;
        let document = loop {
            let code = codes::candidate_code(
                &prefix,
                year,
                base_sequence,
                attempt,
                Utc::now().timestamp_millis(),
            );
            let new_document = NewDocument {
                id: Uuid::new_v4(),
                code,
                title: title.clone(),
                description: input.description.clone(),
                document_type: document_type.clone(),
                area: area.clone(),
                status: DocumentStatus::Draft.as_str().to_string(),
                current_version: INITIAL_VERSION_LABEL.to_string(),
                created_by: actor.id,
                next_review_date: input.next_review_date,
            };

            let inserted = conn.transaction::<_, diesel::result::Error, _>(|conn| {
                diesel::insert_into(documents::table)
                    .values(&new_document)
                    .execute(conn)
            });

            match inserted {
                Ok(_) => break documents::table.find(new_document.id).first::<Document>(conn)?,
                Err(diesel::result::Error::DatabaseError(
                    DatabaseErrorKind::UniqueViolation,
                    _,
                )) => {
                    if attempt >= MAX_CODE_ATTEMPTS {
                        return Err(AppError::internal(
                            "exhausted document code allocation attempts",
                        ));
                    }
                    attempt += 1;
                }
                Err(err) => return Err(AppError::from(err)),
            }
        };

        let first_version = NewDocumentVersion {
            id: Uuid::new_v4(),
            document_id: document.id,
            version_label: INITIAL_VERSION_LABEL.to_string(),
            status: DocumentStatus::Draft.as_str().to_string(),
            change_notes: None,
            created_by: actor.id,
        };
        diesel::insert_into(document_versions::table)
            .values(&first_version)
            .execute(conn)?;

        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_DOCUMENT_CREATED,
            audit::ENTITY_DOCUMENT,
            Some(document.id),
            json!({ "code": document.code, "documentType": document.document_type, "area": document.area }),
        )?;

        Ok(document)
    })
}

pub fn submit_for_review(
    conn: &mut PgConnection,
    actor: &Actor,
    document_id: Uuid,
    reviewer_ids: Vec<Uuid>,
    comments: Option<String>,
) -> AppResult<Document> {
    let mut reviewer_ids = reviewer_ids;
    reviewer_ids.sort();
    reviewer_ids.dedup();
    if reviewer_ids.is_empty() {
        return Err(AppError::bad_request("at least one reviewer is required"));
    }

    conn.transaction::<Document, AppError, _>(|conn| {
        let document: Document = documents::table.find(document_id).first(conn)?;
        if document.status != DocumentStatus::Draft.as_str() {
            return Err(AppError::bad_request(
                "document must be in DRAFT status to submit for review",
            ));
        }

        let reviewers: Vec<User> = users::table
            .filter(users::id.eq_any(&reviewer_ids))
            .filter(users::active.eq(true))
            .load(conn)?;
        if reviewers.len() != reviewer_ids.len() {
            return Err(AppError::bad_request(
                "one or more reviewers do not exist or are inactive",
            ));
        }

        let now = Utc::now().naive_utc();
        for reviewer in &reviewers {
            let task = NewReviewTask {
                id: Uuid::new_v4(),
                document_id,
                reviewer_id: reviewer.id,
                status: ReviewTaskStatus::Pending.as_str().to_string(),
            };
            diesel::insert_into(review_tasks::table)
                .values(&task)
                .execute(conn)?;
        }

        diesel::update(documents::table.find(document_id))
            .set((
                documents::status.eq(DocumentStatus::InReview.as_str()),
                documents::updated_by.eq(Some(actor.id)),
                documents::updated_at.eq(now),
            ))
            .execute(conn)?;

        for reviewer in &reviewers {
            notifications::notify(
                conn,
                reviewer.id,
                Some(document_id),
                notifications::TYPE_REVIEW_REQUEST,
                &format!("Review requested for {}: {}", document.code, document.title),
            )?;
            let mut body = format!(
                "You have been assigned to review {} \"{}\" (version {}).",
                document.code, document.title, document.current_version
            );
            if let Some(comments) = comments.as_deref().filter(|c| !c.trim().is_empty()) {
                body.push_str("\n\nComments: ");
                body.push_str(comments.trim());
            }
            jobs::enqueue_email(
                conn,
                &reviewer.email,
                format!("Review requested: {}", document.code),
                body,
            )?;
        }

        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_REVIEW_SUBMITTED,
            audit::ENTITY_DOCUMENT,
            Some(document_id),
            json!({ "code": document.code, "reviewers": reviewer_ids, "comments": comments }),
        )?;

        documents::table.find(document_id).first(conn).map_err(AppError::from)
    })
}

pub fn decide_review(
    conn: &mut PgConnection,
    actor: &Actor,
    document_id: Uuid,
    task_id: Uuid,
    decision: ReviewDecision,
    comments: Option<String>,
) -> AppResult<ReviewTask> {
    conn.transaction::<ReviewTask, AppError, _>(|conn| {
        let document: Document = documents::table.find(document_id).first(conn)?;
        let task: ReviewTask = review_tasks::table
            .filter(review_tasks::id.eq(task_id))
            .filter(review_tasks::document_id.eq(document_id))
            .first(conn)
            .optional()?
            .ok_or_else(AppError::not_found)?;

        if task.reviewer_id != actor.id {
            return Err(AppError::forbidden(
                "only the assigned reviewer can decide this review",
            ));
        }
        if task.status != ReviewTaskStatus::Pending.as_str() {
            return Err(AppError::bad_request(
                "review task has already been decided",
            ));
        }

        let now = Utc::now().naive_utc();
        let comments = comments.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());

        match decision {
            ReviewDecision::Approve => {
                diesel::update(review_tasks::table.find(task_id))
                    .set((
                        review_tasks::status.eq(ReviewTaskStatus::Approved.as_str()),
                        review_tasks::comments.eq(&comments),
                        review_tasks::completed_at.eq(Some(now)),
                    ))
                    .execute(conn)?;

                diesel::update(documents::table.find(document_id))
                    .set((
                        documents::reviewed_by.eq(Some(actor.id)),
                        documents::updated_at.eq(now),
                    ))
                    .execute(conn)?;

                audit::record(
                    conn,
                    Some(actor.id),
                    audit::ACTION_REVIEW_APPROVED,
                    audit::ENTITY_DOCUMENT,
                    Some(document_id),
                    json!({ "code": document.code, "taskId": task_id, "comments": comments }),
                )?;
            }
            ReviewDecision::RequestChanges => {
                diesel::update(review_tasks::table.find(task_id))
                    .set((
                        review_tasks::status.eq(ReviewTaskStatus::ChangesRequested.as_str()),
                        review_tasks::comments.eq(&comments),
                        review_tasks::completed_at.eq(Some(now)),
                    ))
                    .execute(conn)?;

                // Any rejection sends the whole document back to DRAFT,
                // even with other reviews still open.
                diesel::update(documents::table.find(document_id))
                    .set((
                        documents::status.eq(DocumentStatus::Draft.as_str()),
                        documents::updated_by.eq(Some(actor.id)),
                        documents::updated_at.eq(now),
                    ))
                    .execute(conn)?;

                let creator: User = users::table.find(document.created_by).first(conn)?;
                notifications::notify(
                    conn,
                    creator.id,
                    Some(document_id),
                    notifications::TYPE_CHANGES_REQUESTED,
                    &format!("Changes requested on {}: {}", document.code, document.title),
                )?;
                let mut body = format!(
                    "Changes were requested on {} \"{}\".",
                    document.code, document.title
                );
                if let Some(comments) = comments.as_deref() {
                    body.push_str("\n\nComments: ");
                    body.push_str(comments);
                }
                jobs::enqueue_email(
                    conn,
                    &creator.email,
                    format!("Changes requested: {}", document.code),
                    body,
                )?;

                audit::record(
                    conn,
                    Some(actor.id),
                    audit::ACTION_CHANGES_REQUESTED,
                    audit::ENTITY_DOCUMENT,
                    Some(document_id),
                    json!({ "code": document.code, "taskId": task_id, "comments": comments }),
                )?;
            }
        }

        review_tasks::table.find(task_id).first(conn).map_err(AppError::from)
    })
}

pub fn publish_document(
    conn: &mut PgConnection,
    actor: &Actor,
    document_id: Uuid,
) -> AppResult<Document> {
    conn.transaction::<Document, AppError, _>(|conn| {
        let document: Document = documents::table.find(document_id).first(conn)?;

        let pending: i64 = review_tasks::table
            .filter(review_tasks::document_id.eq(document_id))
            .filter(review_tasks::status.eq(ReviewTaskStatus::Pending.as_str()))
            .count()
            .get_result(conn)?;
        if pending > 0 {
            return Err(AppError::bad_request(
                "document has pending review tasks",
            ));
        }

        let now = Utc::now().naive_utc();
        diesel::update(documents::table.find(document_id))
            .set((
                documents::status.eq(DocumentStatus::Published.as_str()),
                documents::published_at.eq(Some(now)),
                documents::updated_by.eq(Some(actor.id)),
                documents::updated_at.eq(now),
            ))
            .execute(conn)?;

        diesel::update(
            document_versions::table
                .filter(document_versions::document_id.eq(document_id))
                .filter(document_versions::version_label.eq(&document.current_version)),
        )
        .set(document_versions::status.eq(DocumentStatus::Published.as_str()))
        .execute(conn)?;

        let readers: Vec<User> = users::table
            .filter(users::role.eq(Role::Reader.as_str()))
            .filter(users::active.eq(true))
            .filter(users::area.eq(Some(document.area.clone())))
            .load(conn)?;

        for reader in &readers {
            notifications::notify(
                conn,
                reader.id,
                Some(document_id),
                notifications::TYPE_DOCUMENT_PUBLISHED,
                &format!("Published: {} {}", document.code, document.title),
            )?;
            jobs::enqueue_email(
                conn,
                &reader.email,
                format!("Document published: {}", document.code),
                format!(
                    "{} \"{}\" (version {}) has been published for your area.",
                    document.code, document.title, document.current_version
                ),
            )?;
        }

        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_DOCUMENT_PUBLISHED,
            audit::ENTITY_DOCUMENT,
            Some(document_id),
            json!({ "code": document.code, "version": document.current_version, "notifiedReaders": readers.len() }),
        )?;

        documents::table.find(document_id).first(conn).map_err(AppError::from)
    })
}

pub fn start_new_version(
    conn: &mut PgConnection,
    actor: &Actor,
    document_id: Uuid,
    change_notes: Option<String>,
) -> AppResult<Document> {
    conn.transaction::<Document, AppError, _>(|conn| {
        let document: Document = documents::table.find(document_id).first(conn)?;
        if document.status != DocumentStatus::Published.as_str() {
            return Err(AppError::bad_request(
                "document must be in PUBLISHED status to start a new version",
            ));
        }

        let now = Utc::now().naive_utc();
        diesel::update(
            document_versions::table
                .filter(document_versions::document_id.eq(document_id))
                .filter(document_versions::version_label.eq(&document.current_version)),
        )
        .set(document_versions::status.eq(DocumentStatus::Obsolete.as_str()))
        .execute(conn)?;

        let next_label = next_version_label(&document.current_version);
        let new_version = NewDocumentVersion {
            id: Uuid::new_v4(),
            document_id,
            version_label: next_label.clone(),
            status: DocumentStatus::Draft.as_str().to_string(),
            change_notes,
            created_by: actor.id,
        };
        match diesel::insert_into(document_versions::table)
            .values(&new_version)
            .execute(conn)
        {
            Ok(_) => {}
            Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                return Err(AppError::bad_request(format!(
                    "version {next_label} already exists for this document"
                )));
            }
            Err(err) => return Err(AppError::from(err)),
        }

        diesel::update(documents::table.find(document_id))
            .set((
                documents::status.eq(DocumentStatus::Draft.as_str()),
                documents::current_version.eq(&next_label),
                documents::has_file.eq(false),
                documents::published_at.eq::<Option<chrono::NaiveDateTime>>(None),
                documents::reviewed_by.eq::<Option<Uuid>>(None),
                documents::updated_by.eq(Some(actor.id)),
                documents::updated_at.eq(now),
            ))
            .execute(conn)?;

        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_VERSION_CREATED,
            audit::ENTITY_DOCUMENT,
            Some(document_id),
            json!({ "code": document.code, "from": document.current_version, "to": next_label }),
        )?;

        documents::table.find(document_id).first(conn).map_err(AppError::from)
    })
}

pub fn confirm_read(
    conn: &mut PgConnection,
    actor: &Actor,
    document_id: Uuid,
) -> AppResult<ReadConfirmation> {
    conn.transaction::<ReadConfirmation, AppError, _>(|conn| {
        let document: Document = documents::table.find(document_id).first(conn)?;
        if document.status != DocumentStatus::Published.as_str() {
            return Err(AppError::bad_request(
                "only published documents can be confirmed as read",
            ));
        }

        let now = Utc::now().naive_utc();
        let row = NewReadConfirmation {
            id: Uuid::new_v4(),
            document_id,
            user_id: actor.id,
            confirmed_at: now,
        };

        let confirmation: ReadConfirmation = diesel::insert_into(read_confirmations::table)
            .values(&row)
            .on_conflict((
                read_confirmations::document_id,
                read_confirmations::user_id,
            ))
            .do_update()
            .set(read_confirmations::confirmed_at.eq(now))
            .get_result(conn)?;

        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_READ_CONFIRMED,
            audit::ENTITY_DOCUMENT,
            Some(document_id),
            json!({ "code": document.code, "version": document.current_version }),
        )?;

        Ok(confirmation)
    })
}

fn ensure_area_exists(conn: &mut PgConnection, area_code: &str) -> AppResult<()> {
    let known: Option<Uuid> = areas::table
        .filter(areas::code.eq(area_code))
        .filter(areas::active.eq(true))
        .select(areas::id)
        .first(conn)
        .optional()?;
    if known.is_none() {
        return Err(AppError::bad_request(format!(
            "area {area_code} does not exist"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::next_version_label;

    #[test]
    fn major_increment_resets_minor() {
        assert_eq!(next_version_label("v1.0"), "v2.0");
        assert_eq!(next_version_label("v2.3"), "v3.0");
        assert_eq!(next_version_label("v10.2"), "v11.0");
    }

    #[test]
    fn unparseable_labels_fall_back_to_v2() {
        assert_eq!(next_version_label("1.0"), "v2.0");
        assert_eq!(next_version_label("draft-7"), "v2.0");
        assert_eq!(next_version_label("v1"), "v2.0");
        assert_eq!(next_version_label("vX.Y"), "v2.0");
        assert_eq!(next_version_label(""), "v2.0");
    }
}
