use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{jobs::JOB_SEND_EMAIL, mailer::EmailMessage, models::Job, state::AppState};

use super::{JobExecution, JobHandler};

/// Delivery failures are retried with a delay until the attempt ceiling;
/// the API caller never sees either outcome.
pub const EMAIL_MAX_ATTEMPTS: i32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(60);

pub struct SendEmailJob;

impl SendEmailJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for SendEmailJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_EMAIL
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let message: EmailMessage = match serde_json::from_value(job.payload.clone()) {
            Ok(message) => message,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid email payload: {err}"),
                }
            }
        };

        match state.mailer.send(&message).await {
            Ok(()) => JobExecution::Success,
            Err(err) if job.attempts >= EMAIL_MAX_ATTEMPTS => JobExecution::Failed {
                error: format!("giving up after {} attempts: {err:#}", job.attempts),
            },
            Err(err) => JobExecution::Retry {
                delay: RETRY_DELAY,
                error: format!("{err:#}"),
            },
        }
    }
}
