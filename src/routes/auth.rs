use axum::{extract::State, Json};
use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser},
    error::{ok, ok_empty, AppError, AppResult, Envelope},
    models::{NewRefreshToken, RefreshToken, User},
    schema::{refresh_tokens, users},
    state::AppState,
    utils::json::ApiJson,
};

use super::users::{to_user_response, UserResponse};

use crate::schema::refresh_tokens::dsl as refresh_dsl;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserResponse,
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<Json<Envelope<SessionResponse>>> {
    let mut conn = state.db()?;

    let user: User = users::table
        .filter(users::username.eq(&payload.username))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    if !user.active {
        return Err(AppError::unauthorized());
    }

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::unauthorized());
    }

    let session = issue_session(&state, &mut conn, user)?;
    Ok(ok(session))
}

pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> AppResult<Json<Envelope<SessionResponse>>> {
    let hashed = hash_refresh_token(&payload.refresh_token);
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let token: RefreshToken = refresh_dsl::refresh_tokens
        .filter(refresh_dsl::token_hash.eq(&hashed))
        .filter(refresh_dsl::revoked_at.is_null())
        .filter(refresh_dsl::expires_at.gt(now))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    let user: User = users::table.find(token.user_id).first(&mut conn)?;
    if !user.active {
        return Err(AppError::unauthorized());
    }

    // Rotation: the spend and the replacement commit together. A zero-row
    // spend means a concurrent refresh already rotated this token.
    let session = conn.transaction::<_, AppError, _>(|conn| {
        let spent = diesel::update(
            refresh_dsl::refresh_tokens
                .filter(refresh_dsl::id.eq(token.id))
                .filter(refresh_dsl::revoked_at.is_null()),
        )
        .set((
            refresh_dsl::revoked_at.eq(now),
            refresh_dsl::updated_at.eq(now),
        ))
        .execute(conn)?;
        if spent == 0 {
            return Err(AppError::unauthorized());
        }

        issue_session(&state, conn, user)
    })?;
    Ok(ok(session))
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Option<ApiJson<LogoutRequest>>,
) -> AppResult<Json<Envelope<()>>> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    // Revoke the presented token when the client sends one, otherwise every
    // active session for the user.
    let presented = payload.and_then(|ApiJson(body)| body.refresh_token);
    let revoked = match &presented {
        Some(value) => {
            let hashed = hash_refresh_token(value);
            diesel::update(
                refresh_dsl::refresh_tokens
                    .filter(refresh_dsl::token_hash.eq(hashed))
                    .filter(refresh_dsl::user_id.eq(user.user_id))
                    .filter(refresh_dsl::revoked_at.is_null()),
            )
            .set((
                refresh_dsl::revoked_at.eq(now),
                refresh_dsl::updated_at.eq(now),
            ))
            .execute(&mut conn)?
        }
        None => 0,
    };

    if revoked == 0 {
        diesel::update(
            refresh_dsl::refresh_tokens
                .filter(refresh_dsl::user_id.eq(user.user_id))
                .filter(refresh_dsl::revoked_at.is_null()),
        )
        .set((
            refresh_dsl::revoked_at.eq(now),
            refresh_dsl::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
    }

    Ok(ok_empty())
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<UserResponse>>> {
    let mut conn = state.db()?;
    let row: User = users::table
        .find(user.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;
    if !row.active {
        return Err(AppError::unauthorized());
    }
    Ok(ok(to_user_response(row)))
}

fn issue_session(
    state: &AppState,
    conn: &mut PgConnection,
    user: User,
) -> AppResult<SessionResponse> {
    let access_token =
        state
            .jwt
            .generate_token(user.id, &user.username, &user.role, user.area.as_deref())?;

    let now = Utc::now();
    let refresh_value = generate_refresh_token();
    let refresh_hash = hash_refresh_token(&refresh_value);
    let expires_at = now + ChronoDuration::days(state.config.refresh_token_expiry_days);

    let new_refresh = NewRefreshToken {
        id: Uuid::new_v4(),
        user_id: user.id,
        token_hash: refresh_hash,
        issued_at: now.naive_utc(),
        expires_at: expires_at.naive_utc(),
    };
    diesel::insert_into(refresh_tokens::table)
        .values(&new_refresh)
        .execute(conn)?;

    Ok(SessionResponse {
        access_token,
        refresh_token: refresh_value,
        user: to_user_response(user),
    })
}

fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
