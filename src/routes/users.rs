use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    audit,
    auth::{password, AuthenticatedUser},
    error::{ok, ok_empty, AppError, AppResult, Envelope},
    models::{NewUser, Role, User},
    policy,
    schema::{refresh_tokens, users},
    state::AppState,
    utils::json::{classify_nullable, ApiJson, NullableValue},
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub area: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

pub fn to_user_response(user: User) -> UserResponse {
    UserResponse {
        id: user.id,
        username: user.username,
        email: user.email,
        role: user.role,
        area: user.area,
        active: user.active,
        created_at: super::documents::to_iso(user.created_at),
        updated_at: super::documents::to_iso(user.updated_at),
    }
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<Vec<UserResponse>>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;
    ensure_admin(&actor)?;

    let rows: Vec<User> = users::table.order(users::username.asc()).load(&mut conn)?;
    Ok(ok(rows.into_iter().map(to_user_response).collect()))
}

pub async fn create_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<(StatusCode, Json<Envelope<UserResponse>>)> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;
    ensure_admin(&actor)?;

    let username = required_string(&payload, "username")?;
    let email = required_string(&payload, "email")?;
    let plain_password = required_string(&payload, "password")?;
    let role_value = required_string(&payload, "role")?;

    validate_email(&email)?;
    let role = Role::parse(&role_value)
        .ok_or_else(|| AppError::bad_request(format!("unknown role {role_value}")))?;

    // User areas are free labels; an unassigned area means the user sees
    // every area.
    let area = match classify_nullable(payload.get("area")).map_err(AppError::bad_request)? {
        NullableValue::Omitted | NullableValue::Null => None,
        NullableValue::String(code) => Some(code),
    };

    let password_hash = password::hash_password(&plain_password)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        username,
        email,
        password_hash,
        role: role.as_str().to_string(),
        area,
    };

    let created: User = conn.transaction::<_, AppError, _>(|conn| {
        let row: User = diesel::insert_into(users::table)
            .values(&new_user)
            .get_result(conn)
            .map_err(|err| match err {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    AppError::conflict("username or email already in use")
                }
                other => AppError::from(other),
            })?;
        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_USER_CREATED,
            audit::ENTITY_USER,
            Some(row.id),
            json!({ "username": row.username, "role": row.role }),
        )?;
        Ok(row)
    })?;

    Ok((StatusCode::CREATED, ok(to_user_response(created))))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<Json<Envelope<UserResponse>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;
    ensure_admin(&actor)?;

    let mut changeset = UserChangeset {
        email: None,
        role: None,
        password_hash: None,
        area: None,
        updated_at: Utc::now().naive_utc(),
    };

    match classify_nullable(payload.get("email")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => {}
        NullableValue::Null => return Err(AppError::bad_request("email cannot be null")),
        NullableValue::String(value) => {
            validate_email(&value)?;
            changeset.email = Some(value);
        }
    }

    match classify_nullable(payload.get("role")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => {}
        NullableValue::Null => return Err(AppError::bad_request("role cannot be null")),
        NullableValue::String(value) => {
            let role = Role::parse(&value)
                .ok_or_else(|| AppError::bad_request(format!("unknown role {value}")))?;
            changeset.role = Some(role.as_str().to_string());
        }
    }

    match classify_nullable(payload.get("password")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => {}
        NullableValue::Null => return Err(AppError::bad_request("password cannot be null")),
        NullableValue::String(value) => {
            if value.is_empty() {
                return Err(AppError::bad_request("password cannot be empty"));
            }
            changeset.password_hash = Some(password::hash_password(&value)?);
        }
    }

    match classify_nullable(payload.get("area")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => {}
        NullableValue::Null => changeset.area = Some(None),
        NullableValue::String(code) => changeset.area = Some(Some(code)),
    }

    if changeset.is_empty() {
        return Err(AppError::bad_request("no changes provided"));
    }

    let updated: User = conn.transaction::<_, AppError, _>(|conn| {
        let row: User = diesel::update(users::table.find(user_id))
            .set(&changeset)
            .get_result(conn)
            .map_err(|err| match err {
                DieselError::NotFound => AppError::not_found(),
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    AppError::conflict("username or email already in use")
                }
                other => AppError::from(other),
            })?;
        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_USER_UPDATED,
            audit::ENTITY_USER,
            Some(row.id),
            json!({ "username": row.username }),
        )?;
        Ok(row)
    })?;

    Ok(ok(to_user_response(updated)))
}

pub async fn deactivate_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<()>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;
    ensure_admin(&actor)?;

    if user_id == actor.id {
        return Err(AppError::bad_request("cannot deactivate your own account"));
    }

    let now = Utc::now().naive_utc();
    conn.transaction::<_, AppError, _>(|conn| {
        let row: User = diesel::update(users::table.find(user_id))
            .set((users::active.eq(false), users::updated_at.eq(now)))
            .get_result(conn)
            .map_err(|err| match err {
                DieselError::NotFound => AppError::not_found(),
                other => AppError::from(other),
            })?;

        // A deactivated user keeps no live sessions.
        diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::user_id.eq(user_id))
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set((
            refresh_tokens::revoked_at.eq(now),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(conn)?;

        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_USER_DEACTIVATED,
            audit::ENTITY_USER,
            Some(row.id),
            json!({ "username": row.username }),
        )?;
        Ok(())
    })?;

    Ok(ok_empty())
}

pub async fn reactivate_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<UserResponse>>> {
    let mut conn = state.db()?;
    let actor = policy::load_actor(&mut conn, user.user_id)?;
    ensure_admin(&actor)?;

    let now = Utc::now().naive_utc();
    let updated: User = conn.transaction::<_, AppError, _>(|conn| {
        let row: User = diesel::update(users::table.find(user_id))
            .set((users::active.eq(true), users::updated_at.eq(now)))
            .get_result(conn)
            .map_err(|err| match err {
                DieselError::NotFound => AppError::not_found(),
                other => AppError::from(other),
            })?;
        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_USER_REACTIVATED,
            audit::ENTITY_USER,
            Some(row.id),
            json!({ "username": row.username }),
        )?;
        Ok(row)
    })?;

    Ok(ok(to_user_response(updated)))
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UserChangeset {
    email: Option<String>,
    role: Option<String>,
    password_hash: Option<String>,
    area: Option<Option<String>>,
    updated_at: NaiveDateTime,
}

impl UserChangeset {
    fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.role.is_none()
            && self.password_hash.is_none()
            && self.area.is_none()
    }
}

fn ensure_admin(actor: &policy::Actor) -> AppResult<()> {
    if !policy::can_manage_users(actor.role) {
        return Err(AppError::forbidden("administrator role required"));
    }
    Ok(())
}

fn required_string(payload: &Value, field: &str) -> AppResult<String> {
    let value = payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if value.is_empty() {
        return Err(AppError::bad_request(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn validate_email(email: &str) -> AppResult<()> {
    if !email.contains('@') {
        return Err(AppError::bad_request("invalid email address"));
    }
    Ok(())
}
