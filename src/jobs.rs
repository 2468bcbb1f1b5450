//! Transactional outbox. Workflow operations enqueue rows in the same
//! transaction as the state change they announce; the worker binary drains
//! them afterwards. A failed commit therefore never leaves an email behind.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::mailer::EmailMessage;
use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

pub const JOB_SEND_EMAIL: &str = "send-email";

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

pub fn enqueue_job(
    conn: &mut PgConnection,
    job_type: &str,
    payload: Value,
    run_after: Option<NaiveDateTime>,
) -> JobQueueResult<Job> {
    let new_job = NewJob {
        id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        payload,
        status: STATUS_QUEUED.to_string(),
        run_after: run_after.unwrap_or_else(|| Utc::now().naive_utc()),
    };

    diesel::insert_into(jobs::table)
        .values(&new_job)
        .execute(conn)?;

    let job = jobs::table.find(new_job.id).first(conn)?;
    Ok(job)
}

/// Queue one outgoing email. Callers invoke this inside the workflow
/// transaction so the message and the state change commit together.
pub fn enqueue_email(
    conn: &mut PgConnection,
    to: &str,
    subject: String,
    body: String,
) -> JobQueueResult<Job> {
    let message = EmailMessage {
        to: to.to_string(),
        subject,
        body,
    };
    enqueue_job(conn, JOB_SEND_EMAIL, serde_json::to_value(&message)?, None)
}

/// Claim the oldest runnable job of the given types. `FOR UPDATE SKIP
/// LOCKED` keeps concurrent worker processes off the same row; the claim
/// and the attempt bump commit atomically.
pub fn claim_due_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now().naive_utc();

    conn.transaction(|conn| {
        let due = jobs::table
            .filter(jobs::status.eq(STATUS_QUEUED))
            .filter(jobs::run_after.le(now))
            .filter(jobs::job_type.eq_any(job_types))
            .order(jobs::run_after.asc())
            .for_update()
            .skip_locked()
            .first::<Job>(conn)
            .optional()?;

        let Some(job) = due else {
            return Ok::<Option<Job>, diesel::result::Error>(None);
        };

        diesel::update(jobs::table.find(job.id))
            .set((
                jobs::status.eq(STATUS_PROCESSING),
                jobs::attempts.eq(job.attempts + 1),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?;

        let claimed = jobs::table.find(job.id).first(conn)?;
        Ok(Some(claimed))
    })
    .map_err(JobQueueError::from)
}

pub fn mark_job_succeeded(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<()> {
    finish_job(conn, job_id, STATUS_SUCCEEDED, None)
}

pub fn mark_job_failed(
    conn: &mut PgConnection,
    job_id: Uuid,
    error_message: &str,
) -> JobQueueResult<()> {
    finish_job(conn, job_id, STATUS_FAILED, Some(error_message))
}

/// Put a job back in the queue with a delay after a transient failure.
pub fn retry_job_after(
    conn: &mut PgConnection,
    job_id: Uuid,
    delay: Duration,
    error_message: &str,
) -> JobQueueResult<()> {
    let next_run = Utc::now()
        + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_QUEUED),
            jobs::run_after.eq(next_run.naive_utc()),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

fn finish_job(
    conn: &mut PgConnection,
    job_id: Uuid,
    status: &str,
    error_message: Option<&str>,
) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(status),
            jobs::last_error.eq(error_message.map(str::to_string)),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}
