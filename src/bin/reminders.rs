use chrono::Utc;
use tracing_subscriber::EnvFilter;

use docflow::config::AppConfig;
use docflow::db;
use docflow::reminders::run_review_reminder_sweep;

/// One-shot review-reminder sweep, intended for a daily cron entry.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "reminders",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get()?;

    let created = run_review_reminder_sweep(&mut conn, Utc::now().naive_utc())
        .map_err(|err| anyhow::anyhow!("reminder sweep failed: {}", err.message()))?;
    tracing::info!(created, "reminder sweep finished");

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
