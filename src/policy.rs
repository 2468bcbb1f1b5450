use diesel::dsl::exists;
use diesel::{prelude::*, select, PgConnection};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Role, User},
    schema::{review_tasks, users},
};

/// The acting user as the access rules see them. Loaded fresh per request
/// so role changes and deactivation take effect immediately.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
    pub area: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(&'static str),
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

pub fn is_privileged(role: Role) -> bool {
    matches!(role, Role::Administrator | Role::QualityManager)
}

/// create / update / upload / submit-review / new-version
pub fn can_author(role: Role) -> bool {
    matches!(
        role,
        Role::Administrator | Role::QualityManager | Role::DocumentOwner
    )
}

pub fn can_publish(role: Role) -> bool {
    matches!(
        role,
        Role::Administrator | Role::QualityManager | Role::Approver
    )
}

pub fn can_manage_users(role: Role) -> bool {
    matches!(role, Role::Administrator)
}

/// Area-scoped visibility. A review task on the document is itself an
/// access grant, whatever the actor's role.
pub fn document_access(actor: &Actor, document_area: &str, has_review_task: bool) -> AccessDecision {
    if is_privileged(actor.role) {
        return AccessDecision::Allow;
    }
    match actor.area.as_deref() {
        None => AccessDecision::Allow,
        Some(area) if area == document_area => AccessDecision::Allow,
        Some(_) if has_review_task => AccessDecision::Allow,
        Some(_) => AccessDecision::Deny("document belongs to another area"),
    }
}

/// Listing never honors a foreign area filter: non-privileged actors with
/// an area are pinned to it.
pub fn forced_area_scope(actor: &Actor) -> Option<&str> {
    if is_privileged(actor.role) {
        return None;
    }
    actor.area.as_deref()
}

pub fn load_actor(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Actor> {
    let user: User = match users::table.find(user_id).first(conn) {
        Ok(user) => user,
        Err(diesel::result::Error::NotFound) => return Err(AppError::unauthorized()),
        Err(err) => return Err(AppError::from(err)),
    };

    if !user.active {
        return Err(AppError::unauthorized());
    }

    let role = Role::parse(&user.role)
        .ok_or_else(|| AppError::internal(format!("unknown role {} for user {}", user.role, user.id)))?;

    Ok(Actor {
        id: user.id,
        role,
        area: user.area,
    })
}

pub fn has_review_task(
    conn: &mut PgConnection,
    document_id: Uuid,
    user_id: Uuid,
) -> AppResult<bool> {
    let found: bool = select(exists(
        review_tasks::table
            .filter(review_tasks::document_id.eq(document_id))
            .filter(review_tasks::reviewer_id.eq(user_id)),
    ))
    .get_result(conn)?;
    Ok(found)
}

/// Convenience for handlers: resolve the task grant and turn a deny into
/// a 403 carrying the reason.
pub fn ensure_document_access(
    conn: &mut PgConnection,
    actor: &Actor,
    document_id: Uuid,
    document_area: &str,
) -> AppResult<()> {
    let task_grant = if is_privileged(actor.role) || actor.area.is_none() {
        false
    } else {
        has_review_task(conn, document_id, actor.id)?
    };

    match document_access(actor, document_area, task_grant) {
        AccessDecision::Allow => Ok(()),
        AccessDecision::Deny(reason) => Err(AppError::forbidden(reason)),
    }
}
