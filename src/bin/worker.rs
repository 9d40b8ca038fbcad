use std::{sync::Arc, time::Duration};

use diesel::prelude::*;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use safedocs_backend::{
    auth::jwt::JwtService,
    config::AppConfig,
    db, default_handlers,
    jobs::{self, JOB_DEACTIVATE_SHARE_LINKS, JOB_EXPIRE_DOCUMENTS},
    schema::jobs as jobs_table,
    state::AppState,
    storage::build_storage,
    Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        storage_backend = %config.storage_backend,
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = build_storage(&config).await?;
    let jwt = JwtService::from_config(&config)?;

    let state = Arc::new(AppState::new(pool, config, storage, jwt));
    seed_recurring_jobs(&state)?;

    let worker = Worker::new(state, default_handlers(), Duration::from_secs(2));

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

/// Enqueues the recurring sweeps unless an earlier run is still queued.
fn seed_recurring_jobs(state: &AppState) -> anyhow::Result<()> {
    let mut conn = state.pool.get()?;

    for job_type in [JOB_EXPIRE_DOCUMENTS, JOB_DEACTIVATE_SHARE_LINKS] {
        let queued: i64 = jobs_table::table
            .filter(jobs_table::job_type.eq(job_type))
            .filter(jobs_table::status.eq(jobs::STATUS_QUEUED))
            .count()
            .get_result(&mut conn)?;
        if queued == 0 {
            jobs::enqueue_job(&mut conn, job_type, serde_json::json!({}), None)?;
            tracing::info!(job_type, "seeded recurring job");
        }
    }

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
