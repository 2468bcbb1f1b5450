use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use diesel::dsl::exists;
use diesel::{prelude::*, select, PgConnection};
use tracing::info;

use crate::{
    error::AppResult,
    models::{Document, DocumentStatus},
    notifications,
    schema::{documents, notifications as notifications_table},
};

const SCAN_WINDOW_DAYS: i64 = 31;
const REMINDER_THRESHOLD_DAYS: i64 = 30;

/// Days remaining until the review date, when that puts the document
/// inside the reminder threshold. Overdue documents stay eligible
/// (negative values).
pub fn reminder_due(next_review_date: NaiveDate, today: NaiveDate) -> Option<i64> {
    let days_remaining = (next_review_date - today).num_days();
    (days_remaining <= REMINDER_THRESHOLD_DAYS).then_some(days_remaining)
}

pub fn reminder_message(code: &str, title: &str, days_remaining: i64) -> String {
    if days_remaining > 0 {
        format!("Review due in {days_remaining} days for {code}: {title}")
    } else if days_remaining == 0 {
        format!("Review due today for {code}: {title}")
    } else {
        format!(
            "Review overdue by {} days for {code}: {title}",
            -days_remaining
        )
    }
}

/// One pass of the daily reminder job. At most one REVIEW_REMINDER per
/// document per calendar day reaches the document's creator; re-running
/// within the same day inserts nothing. Returns how many reminders were
/// created.
pub fn run_review_reminder_sweep(
    conn: &mut PgConnection,
    now: NaiveDateTime,
) -> AppResult<usize> {
    let today = now.date();
    let day_start = today.and_time(NaiveTime::MIN);
    let horizon = today + Duration::days(SCAN_WINDOW_DAYS);

    let due_documents: Vec<Document> = documents::table
        .filter(documents::status.eq(DocumentStatus::Published.as_str()))
        .filter(documents::next_review_date.is_not_null())
        .filter(documents::next_review_date.le(horizon))
        .load(conn)?;

    let mut created = 0;
    for document in due_documents {
        let Some(next_review_date) = document.next_review_date else {
            continue;
        };
        let Some(days_remaining) = reminder_due(next_review_date, today) else {
            continue;
        };

        let already_notified: bool = select(exists(
            notifications_table::table
                .filter(notifications_table::user_id.eq(document.created_by))
                .filter(notifications_table::document_id.eq(Some(document.id)))
                .filter(
                    notifications_table::notification_type
                        .eq(notifications::TYPE_REVIEW_REMINDER),
                )
                .filter(notifications_table::created_at.ge(day_start)),
        ))
        .get_result(conn)?;
        if already_notified {
            continue;
        }

        notifications::notify(
            conn,
            document.created_by,
            Some(document.id),
            notifications::TYPE_REVIEW_REMINDER,
            &reminder_message(&document.code, &document.title, days_remaining),
        )?;
        created += 1;
    }

    if created > 0 {
        info!(reminders = created, "review reminder sweep created notifications");
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn documents_inside_the_threshold_are_due() {
        let today = date(2025, 6, 1);
        assert_eq!(reminder_due(date(2025, 6, 6), today), Some(5));
        assert_eq!(reminder_due(date(2025, 7, 1), today), Some(30));
        assert_eq!(reminder_due(date(2025, 6, 1), today), Some(0));
    }

    #[test]
    fn overdue_documents_stay_due() {
        let today = date(2025, 6, 1);
        assert_eq!(reminder_due(date(2025, 5, 29), today), Some(-3));
    }

    #[test]
    fn documents_beyond_the_threshold_are_skipped() {
        let today = date(2025, 6, 1);
        assert_eq!(reminder_due(date(2025, 7, 2), today), None);
        assert_eq!(reminder_due(date(2026, 1, 1), today), None);
    }

    #[test]
    fn message_wording_by_distance() {
        assert_eq!(
            reminder_message("SOP-2025-0001", "Cleaning", 5),
            "Review due in 5 days for SOP-2025-0001: Cleaning"
        );
        assert_eq!(
            reminder_message("SOP-2025-0001", "Cleaning", 0),
            "Review due today for SOP-2025-0001: Cleaning"
        );
        assert_eq!(
            reminder_message("SOP-2025-0001", "Cleaning", -2),
            "Review overdue by 2 days for SOP-2025-0001: Cleaning"
        );
    }
}
