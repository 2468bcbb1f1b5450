use diesel::{prelude::*, PgConnection};
use uuid::Uuid;

use crate::{error::AppResult, models::NewNotification, schema::notifications};

pub const TYPE_REVIEW_REQUEST: &str = "REVIEW_REQUEST";
pub const TYPE_CHANGES_REQUESTED: &str = "CHANGES_REQUESTED";
pub const TYPE_DOCUMENT_PUBLISHED: &str = "DOCUMENT_PUBLISHED";
pub const TYPE_REVIEW_REMINDER: &str = "REVIEW_REMINDER";

pub fn notify(
    conn: &mut PgConnection,
    user_id: Uuid,
    document_id: Option<Uuid>,
    notification_type: &str,
    message: &str,
) -> AppResult<()> {
    let row = NewNotification {
        id: Uuid::new_v4(),
        user_id,
        document_id,
        notification_type: notification_type.to_string(),
        message: message.to_string(),
    };

    diesel::insert_into(notifications::table)
        .values(&row)
        .execute(conn)?;
    Ok(())
}
