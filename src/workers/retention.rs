use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use tokio::task;
use tracing::{error, info, warn};

use crate::{
    jobs::{enqueue_job, JOB_EXPIRE_DOCUMENTS},
    schema::documents,
    state::AppState,
};

use super::{JobExecution, JobHandler};

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
struct ExpirePayload {
    #[serde(default)]
    sweep_interval_secs: Option<u64>,
}

/// Soft-deletes documents whose retention deadline has passed and
/// reschedules itself for the next sweep.
pub struct ExpireDocumentsJob;

impl ExpireDocumentsJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for ExpireDocumentsJob {
    fn job_type(&self) -> &'static str {
        JOB_EXPIRE_DOCUMENTS
    }

    async fn handle(&self, state: Arc<AppState>, job: crate::models::Job) -> JobExecution {
        let payload: ExpirePayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid expire-documents payload: {err}"),
                }
            }
        };

        let state_clone = state.clone();
        match task::spawn_blocking(move || expire_documents(state_clone, payload)).await {
            Ok(Ok(execution)) => execution,
            Ok(Err(err)) => {
                warn!(job_id = %job.id, error = %err, "expire-documents sweep will retry");
                JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: err,
                }
            }
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "expire-documents task panicked");
                JobExecution::Retry {
                    delay: Duration::from_secs(60),
                    error: format!("worker panicked: {join_err}"),
                }
            }
        }
    }
}

fn expire_documents(state: Arc<AppState>, payload: ExpirePayload) -> Result<JobExecution, String> {
    let mut conn = state.db().map_err(|err| format!("{err:?}"))?;
    let now = Utc::now().naive_utc();

    let expired = diesel::update(
        documents::table
            .filter(documents::deleted_at.is_null())
            .filter(documents::expires_at.le(now)),
    )
    .set((
        documents::deleted_at.eq(Some(now)),
        documents::updated_at.eq(now),
    ))
    .execute(&mut conn)
    .map_err(|err| format!("{err:?}"))?;

    if expired > 0 {
        info!(count = expired, "expired documents moved to trash");
    }

    let interval = payload
        .sweep_interval_secs
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    let next_run = now + ChronoDuration::seconds(interval as i64);

    enqueue_job(
        &mut conn,
        JOB_EXPIRE_DOCUMENTS,
        job_payload(interval),
        Some(next_run),
    )
    .map_err(|err| err.to_string())?;

    Ok(JobExecution::Success)
}

fn job_payload(interval: u64) -> serde_json::Value {
    serde_json::json!({ "sweep_interval_secs": interval })
}
