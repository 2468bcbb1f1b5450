use std::env;

use anyhow::Context;
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use docflow::auth::password::hash_password;
use docflow::config::AppConfig;
use docflow::db;
use docflow::models::{NewArea, NewDocumentType, NewUser, Role};
use docflow::schema::{areas, document_types, users};

/// Bootstraps an administrator account and optional reference data.
/// Idempotent: existing rows are left untouched.
fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "seed",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get()?;
    db::run_migrations(&mut conn)?;

    let username = env::var("SEED_ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string());
    let email = env::var("SEED_ADMIN_EMAIL").context("SEED_ADMIN_EMAIL must be set")?;
    let password = env::var("SEED_ADMIN_PASSWORD").context("SEED_ADMIN_PASSWORD must be set")?;

    let admin = NewUser {
        id: Uuid::new_v4(),
        username: username.clone(),
        email,
        password_hash: hash_password(&password)?,
        role: Role::Administrator.as_str().to_string(),
        area: None,
    };
    let inserted = diesel::insert_into(users::table)
        .values(&admin)
        .on_conflict(users::username)
        .do_nothing()
        .execute(&mut conn)?;
    if inserted > 0 {
        tracing::info!(%username, "created administrator account");
    } else {
        tracing::info!(%username, "administrator account already present");
    }

    // SEED_AREAS="QA:Quality Assurance,PROD:Production"
    let mut seeded_areas = 0;
    if let Ok(raw) = env::var("SEED_AREAS") {
        for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
            let (code, name) = entry
                .split_once(':')
                .with_context(|| format!("SEED_AREAS entry {entry:?} must be CODE:NAME"))?;
            let row = NewArea {
                id: Uuid::new_v4(),
                code: code.trim().to_string(),
                name: name.trim().to_string(),
            };
            seeded_areas += diesel::insert_into(areas::table)
                .values(&row)
                .on_conflict(areas::code)
                .do_nothing()
                .execute(&mut conn)?;
        }
    }

    // SEED_DOCUMENT_TYPES="SOP:Standard Operating Procedure:SOP"
    let mut seeded_types = 0;
    if let Ok(raw) = env::var("SEED_DOCUMENT_TYPES") {
        for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let code = parts.next().map(str::trim).unwrap_or_default();
            let name = parts.next().map(str::trim).unwrap_or_default();
            let prefix = parts.next().map(str::trim).unwrap_or_default();
            if code.is_empty() || name.is_empty() || prefix.is_empty() {
                anyhow::bail!("SEED_DOCUMENT_TYPES entry {entry:?} must be CODE:NAME:PREFIX");
            }
            let row = NewDocumentType {
                id: Uuid::new_v4(),
                code: code.to_string(),
                name: name.to_string(),
                prefix: prefix.to_uppercase(),
            };
            seeded_types += diesel::insert_into(document_types::table)
                .values(&row)
                .on_conflict(document_types::code)
                .do_nothing()
                .execute(&mut conn)?;
        }
    }

    tracing::info!(seeded_areas, seeded_types, "seed finished");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
