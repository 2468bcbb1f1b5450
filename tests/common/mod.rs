use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::NaiveDateTime;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use docflow::auth::jwt::JwtService;
use docflow::auth::password::hash_password;
use docflow::config::AppConfig;
use docflow::db::{self, PgPool};
use docflow::mailer::LogMailer;
use docflow::models::{Job, NewArea, NewDocument, NewDocumentType, NewUser};
use docflow::routes;
use docflow::state::AppState;
use docflow::storage::ObjectStorage;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type: content_type.to_string(),
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

#[allow(dead_code)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
}

impl TestApp {
    /// Connects to `TEST_DATABASE_URL`. Returns `None` when the variable
    /// is unset so the suite can skip on machines without a test database.
    pub async fn new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL is not set; skipping");
            return Ok(None);
        };

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            smtp: None,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, storage_for_state, Arc::new(LogMailer), jwt);
        let router = routes::create_router(state.clone());

        Ok(Some(Self {
            state,
            router,
            storage,
        }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub async fn insert_user(
        &self,
        username: &str,
        password: &str,
        role: &str,
        area: Option<&str>,
    ) -> Result<Uuid> {
        let username = username.to_string();
        let password = password.to_string();
        let role = role.to_string();
        let area = area.map(str::to_string);
        self.with_conn(move |conn| {
            let password_hash = hash_password(&password)?;
            let user = NewUser {
                id: Uuid::new_v4(),
                email: format!("{username}@example.com"),
                username,
                password_hash,
                role,
                area,
            };
            diesel::insert_into(docflow::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_area(&self, code: &str, name: &str) -> Result<Uuid> {
        let area = NewArea {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
        };
        let id = area.id;
        self.with_conn(move |conn| {
            diesel::insert_into(docflow::schema::areas::table)
                .values(&area)
                .execute(conn)
                .context("failed to insert area")?;
            Ok(id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_document_type(&self, code: &str, name: &str, prefix: &str) -> Result<Uuid> {
        let document_type = NewDocumentType {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
            prefix: prefix.to_string(),
        };
        let id = document_type.id;
        self.with_conn(move |conn| {
            diesel::insert_into(docflow::schema::document_types::table)
                .values(&document_type)
                .execute(conn)
                .context("failed to insert document type")?;
            Ok(id)
        })
        .await
    }

    /// Plants a document row with a fixed code, bypassing allocation.
    #[allow(dead_code)]
    pub async fn insert_document_with_code(
        &self,
        code: &str,
        document_type: &str,
        area: &str,
        created_by: Uuid,
    ) -> Result<Uuid> {
        let document = NewDocument {
            id: Uuid::new_v4(),
            code: code.to_string(),
            title: format!("seeded {code}"),
            description: None,
            document_type: document_type.to_string(),
            area: area.to_string(),
            status: "DRAFT".to_string(),
            current_version: "v1.0".to_string(),
            created_by,
            next_review_date: None,
        };
        let id = document.id;
        self.with_conn(move |conn| {
            diesel::insert_into(docflow::schema::documents::table)
                .values(&document)
                .execute(conn)
                .context("failed to insert document")?;
            Ok(id)
        })
        .await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/auth/login", &LoginPayload { username, password }, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SessionData {
            access_token: String,
            refresh_token: String,
        }
        let parsed: SessionData = decode_data(response).await?;
        Ok(Session {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
        })
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        Ok(self.login(username, password).await?.access_token)
    }

    #[allow(dead_code)]
    pub async fn clear_jobs(&self) -> Result<()> {
        self.with_conn(|conn| {
            use docflow::schema::jobs::dsl::jobs as jobs_table;
            diesel::delete(jobs_table)
                .execute(conn)
                .context("failed to clear jobs")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            use docflow::schema::jobs::dsl::{job_type as job_type_col, jobs as jobs_table};
            let rows = jobs_table
                .filter(job_type_col.eq(&ty))
                .load::<Job>(conn)
                .context("failed to load jobs")?;
            Ok(rows)
        })
        .await
    }

    /// (total, live) refresh-token rows for the user.
    #[allow(dead_code)]
    pub async fn refresh_token_counts(&self, user_id: Uuid) -> Result<(i64, i64)> {
        self.with_conn(move |conn| {
            use docflow::schema::refresh_tokens::dsl::{
                refresh_tokens as tokens_table, revoked_at, user_id as user_col,
            };
            let total: i64 = tokens_table
                .filter(user_col.eq(user_id))
                .count()
                .get_result(conn)
                .context("failed to count refresh tokens")?;
            let live: i64 = tokens_table
                .filter(user_col.eq(user_id))
                .filter(revoked_at.is_null())
                .count()
                .get_result(conn)
                .context("failed to count live refresh tokens")?;
            Ok((total, live))
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn run_reminder_sweep(&self, now: NaiveDateTime) -> Result<usize> {
        self.with_conn(move |conn| {
            docflow::reminders::run_review_reminder_sweep(conn, now)
                .map_err(|err| anyhow!("reminder sweep failed: {}", err.message()))
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::PATCH)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn upload_file(
        &self,
        path: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"));

        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

/// Unwraps `{"success": true, "data": ...}` into the payload type.
pub async fn decode_data<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let status = response.status();
    let body = body_to_vec(response.into_body()).await?;
    let envelope: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|err| anyhow!("response ({status}) is not JSON: {err}"))?;
    ensure!(
        envelope["success"] == serde_json::Value::Bool(true),
        "response ({status}) not successful: {envelope}"
    );
    let data = envelope
        .get("data")
        .cloned()
        .ok_or_else(|| anyhow!("response ({status}) has no data: {envelope}"))?;
    serde_json::from_value(data).map_err(|err| anyhow!("failed to decode data: {err}"))
}

/// Extracts the `error` string of a failed response.
#[allow(dead_code)]
pub async fn decode_error(response: hyper::Response<Body>) -> Result<String> {
    let body = body_to_vec(response.into_body()).await?;
    let envelope: serde_json::Value = serde_json::from_slice(&body)?;
    envelope
        .get("error")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("response has no error field: {envelope}"))
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        db::run_migrations(&mut conn)?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE refresh_tokens, jobs, audit_log, notifications, read_confirmations, \
         review_tasks, document_versions, documents, document_types, areas, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
