use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{dsl::count_star, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    audit,
    auth::AuthenticatedUser,
    error::{ok, ok_empty, AppError, AppResult, Envelope},
    models::{Area, DocumentType, NewArea, NewDocumentType},
    policy,
    schema::{areas, document_types, documents},
    state::AppState,
    utils::json::{classify_nullable, ApiJson, NullableValue},
};

use super::documents::to_iso;

#[derive(Deserialize)]
pub struct CreateAreaRequest {
    pub code: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateDocumentTypeRequest {
    pub code: String,
    pub name: String,
    pub prefix: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaResponse {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub active: bool,
    pub document_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTypeResponse {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub prefix: String,
    pub active: bool,
    pub document_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

fn to_area_response(area: Area, document_count: i64) -> AreaResponse {
    AreaResponse {
        id: area.id,
        code: area.code,
        name: area.name,
        active: area.active,
        document_count,
        created_at: to_iso(area.created_at),
        updated_at: to_iso(area.updated_at),
    }
}

fn to_type_response(document_type: DocumentType, document_count: i64) -> DocumentTypeResponse {
    DocumentTypeResponse {
        id: document_type.id,
        code: document_type.code,
        name: document_type.name,
        prefix: document_type.prefix,
        active: document_type.active,
        document_count,
        created_at: to_iso(document_type.created_at),
        updated_at: to_iso(document_type.updated_at),
    }
}

pub async fn list_areas(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<Vec<AreaResponse>>>> {
    let mut conn = state.db()?;
    ensure_privileged(&mut conn, user.user_id)?;

    let rows: Vec<Area> = areas::table.order(areas::code.asc()).load(&mut conn)?;
    let counts: HashMap<String, i64> = documents::table
        .group_by(documents::area)
        .select((documents::area, count_star()))
        .load::<(String, i64)>(&mut conn)?
        .into_iter()
        .collect();

    let response = rows
        .into_iter()
        .map(|area| {
            let count = counts.get(&area.code).copied().unwrap_or(0);
            to_area_response(area, count)
        })
        .collect();

    Ok(ok(response))
}

pub async fn create_area(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<CreateAreaRequest>,
) -> AppResult<(StatusCode, Json<Envelope<AreaResponse>>)> {
    let mut conn = state.db()?;
    let actor = ensure_privileged(&mut conn, user.user_id)?;

    let code = payload.code.trim().to_string();
    if code.is_empty() {
        return Err(AppError::bad_request("code must not be empty"));
    }
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let new_area = NewArea {
        id: Uuid::new_v4(),
        code,
        name,
    };

    let area: Area = conn.transaction::<_, AppError, _>(|conn| {
        let row: Area = diesel::insert_into(areas::table)
            .values(&new_area)
            .get_result(conn)
            .map_err(|err| match err {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ) => AppError::conflict("area code already exists"),
                other => AppError::from(other),
            })?;
        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_AREA_CREATED,
            audit::ENTITY_AREA,
            Some(row.id),
            json!({ "code": row.code }),
        )?;
        Ok(row)
    })?;

    Ok((StatusCode::CREATED, ok(to_area_response(area, 0))))
}

pub async fn update_area(
    State(state): State<AppState>,
    Path(area_id): Path<Uuid>,
    user: AuthenticatedUser,
    ApiJson(body): ApiJson<Value>,
) -> AppResult<Json<Envelope<AreaResponse>>> {
    let mut conn = state.db()?;
    let actor = ensure_privileged(&mut conn, user.user_id)?;

    let existing: Area = areas::table.find(area_id).first(&mut conn)?;

    let name_change = match classify_nullable(body.get("name")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => return Err(AppError::bad_request("name cannot be null")),
        NullableValue::String(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("name must not be empty"));
            }
            Some(trimmed)
        }
    };
    let active_change = parse_active(&body)?;

    if name_change.is_none() && active_change.is_none() {
        let count = documents_in_area(&mut conn, &existing.code)?;
        return Ok(ok(to_area_response(existing, count)));
    }

    let changeset = AreaChangeset {
        name: name_change,
        active: active_change,
        updated_at: Utc::now().naive_utc(),
    };

    let updated: Area = conn.transaction::<_, AppError, _>(|conn| {
        let row: Area = diesel::update(areas::table.find(area_id))
            .set(&changeset)
            .get_result(conn)?;
        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_AREA_UPDATED,
            audit::ENTITY_AREA,
            Some(row.id),
            json!({ "code": row.code }),
        )?;
        Ok(row)
    })?;

    let count = documents_in_area(&mut conn, &updated.code)?;
    Ok(ok(to_area_response(updated, count)))
}

/// Reference data is never destroyed; delete means deactivate.
pub async fn deactivate_area(
    State(state): State<AppState>,
    Path(area_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<()>>> {
    let mut conn = state.db()?;
    let actor = ensure_privileged(&mut conn, user.user_id)?;

    conn.transaction::<_, AppError, _>(|conn| {
        let row: Area = diesel::update(areas::table.find(area_id))
            .set((
                areas::active.eq(false),
                areas::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)
            .map_err(|err| match err {
                diesel::result::Error::NotFound => AppError::not_found(),
                other => AppError::from(other),
            })?;
        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_AREA_DEACTIVATED,
            audit::ENTITY_AREA,
            Some(row.id),
            json!({ "code": row.code }),
        )?;
        Ok(())
    })?;

    Ok(ok_empty())
}

pub async fn list_document_types(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<Vec<DocumentTypeResponse>>>> {
    let mut conn = state.db()?;
    ensure_privileged(&mut conn, user.user_id)?;

    let rows: Vec<DocumentType> = document_types::table
        .order(document_types::code.asc())
        .load(&mut conn)?;
    let counts: HashMap<String, i64> = documents::table
        .group_by(documents::document_type)
        .select((documents::document_type, count_star()))
        .load::<(String, i64)>(&mut conn)?
        .into_iter()
        .collect();

    let response = rows
        .into_iter()
        .map(|document_type| {
            let count = counts.get(&document_type.code).copied().unwrap_or(0);
            to_type_response(document_type, count)
        })
        .collect();

    Ok(ok(response))
}

pub async fn create_document_type(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<CreateDocumentTypeRequest>,
) -> AppResult<(StatusCode, Json<Envelope<DocumentTypeResponse>>)> {
    let mut conn = state.db()?;
    let actor = ensure_privileged(&mut conn, user.user_id)?;

    let code = payload.code.trim().to_string();
    if code.is_empty() {
        return Err(AppError::bad_request("code must not be empty"));
    }
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    let prefix = payload.prefix.trim().to_uppercase();
    if prefix.is_empty() {
        return Err(AppError::bad_request("prefix must not be empty"));
    }

    let new_type = NewDocumentType {
        id: Uuid::new_v4(),
        code,
        name,
        prefix,
    };

    let document_type: DocumentType = conn.transaction::<_, AppError, _>(|conn| {
        let row: DocumentType = diesel::insert_into(document_types::table)
            .values(&new_type)
            .get_result(conn)
            .map_err(|err| match err {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ) => AppError::conflict("document type code already exists"),
                other => AppError::from(other),
            })?;
        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_DOCUMENT_TYPE_CREATED,
            audit::ENTITY_DOCUMENT_TYPE,
            Some(row.id),
            json!({ "code": row.code, "prefix": row.prefix }),
        )?;
        Ok(row)
    })?;

    Ok((StatusCode::CREATED, ok(to_type_response(document_type, 0))))
}

pub async fn update_document_type(
    State(state): State<AppState>,
    Path(type_id): Path<Uuid>,
    user: AuthenticatedUser,
    ApiJson(body): ApiJson<Value>,
) -> AppResult<Json<Envelope<DocumentTypeResponse>>> {
    let mut conn = state.db()?;
    let actor = ensure_privileged(&mut conn, user.user_id)?;

    let existing: DocumentType = document_types::table.find(type_id).first(&mut conn)?;

    let name_change = match classify_nullable(body.get("name")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => return Err(AppError::bad_request("name cannot be null")),
        NullableValue::String(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("name must not be empty"));
            }
            Some(trimmed)
        }
    };
    let prefix_change =
        match classify_nullable(body.get("prefix")).map_err(AppError::bad_request)? {
            NullableValue::Omitted => None,
            NullableValue::Null => return Err(AppError::bad_request("prefix cannot be null")),
            NullableValue::String(value) => {
                let trimmed = value.trim().to_uppercase();
                if trimmed.is_empty() {
                    return Err(AppError::bad_request("prefix must not be empty"));
                }
                Some(trimmed)
            }
        };
    let active_change = parse_active(&body)?;

    if name_change.is_none() && prefix_change.is_none() && active_change.is_none() {
        let count = documents_of_type(&mut conn, &existing.code)?;
        return Ok(ok(to_type_response(existing, count)));
    }

    let changeset = TypeChangeset {
        name: name_change,
        prefix: prefix_change,
        active: active_change,
        updated_at: Utc::now().naive_utc(),
    };

    let updated: DocumentType = conn.transaction::<_, AppError, _>(|conn| {
        let row: DocumentType = diesel::update(document_types::table.find(type_id))
            .set(&changeset)
            .get_result(conn)?;
        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_DOCUMENT_TYPE_UPDATED,
            audit::ENTITY_DOCUMENT_TYPE,
            Some(row.id),
            json!({ "code": row.code }),
        )?;
        Ok(row)
    })?;

    let count = documents_of_type(&mut conn, &updated.code)?;
    Ok(ok(to_type_response(updated, count)))
}

pub async fn deactivate_document_type(
    State(state): State<AppState>,
    Path(type_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<()>>> {
    let mut conn = state.db()?;
    let actor = ensure_privileged(&mut conn, user.user_id)?;

    conn.transaction::<_, AppError, _>(|conn| {
        let row: DocumentType = diesel::update(document_types::table.find(type_id))
            .set((
                document_types::active.eq(false),
                document_types::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)
            .map_err(|err| match err {
                diesel::result::Error::NotFound => AppError::not_found(),
                other => AppError::from(other),
            })?;
        audit::record(
            conn,
            Some(actor.id),
            audit::ACTION_DOCUMENT_TYPE_DEACTIVATED,
            audit::ENTITY_DOCUMENT_TYPE,
            Some(row.id),
            json!({ "code": row.code }),
        )?;
        Ok(())
    })?;

    Ok(ok_empty())
}

#[derive(AsChangeset)]
#[diesel(table_name = areas)]
struct AreaChangeset {
    name: Option<String>,
    active: Option<bool>,
    updated_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = document_types)]
struct TypeChangeset {
    name: Option<String>,
    prefix: Option<String>,
    active: Option<bool>,
    updated_at: NaiveDateTime,
}

fn parse_active(body: &Value) -> AppResult<Option<bool>> {
    match body.get("active") {
        None => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(other) => Err(AppError::bad_request(format!(
            "expected boolean for active, got {other}"
        ))),
    }
}

fn documents_in_area(conn: &mut PgConnection, area_code: &str) -> AppResult<i64> {
    let count = documents::table
        .filter(documents::area.eq(area_code))
        .select(count_star())
        .first(conn)?;
    Ok(count)
}

fn documents_of_type(conn: &mut PgConnection, type_code: &str) -> AppResult<i64> {
    let count = documents::table
        .filter(documents::document_type.eq(type_code))
        .select(count_star())
        .first(conn)?;
    Ok(count)
}

fn ensure_privileged(conn: &mut PgConnection, user_id: Uuid) -> AppResult<policy::Actor> {
    let actor = policy::load_actor(conn, user_id)?;
    if !policy::is_privileged(actor.role) {
        return Err(AppError::forbidden(
            "configuration requires a privileged role",
        ));
    }
    Ok(actor)
}
