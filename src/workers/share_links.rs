use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use tokio::task;
use tracing::{error, info, warn};

use crate::{
    jobs::{enqueue_job, JOB_DEACTIVATE_SHARE_LINKS},
    schema::share_links,
    state::AppState,
};

use super::{JobExecution, JobHandler};

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
struct DeactivatePayload {
    #[serde(default)]
    sweep_interval_secs: Option<u64>,
}

/// Flips share links past their expiry or usage cap to inactive so the
/// public resolver can reject them cheaply, then reschedules itself.
pub struct DeactivateShareLinksJob;

impl DeactivateShareLinksJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for DeactivateShareLinksJob {
    fn job_type(&self) -> &'static str {
        JOB_DEACTIVATE_SHARE_LINKS
    }

    async fn handle(&self, state: Arc<AppState>, job: crate::models::Job) -> JobExecution {
        let payload: DeactivatePayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid deactivate-share-links payload: {err}"),
                }
            }
        };

        let state_clone = state.clone();
        match task::spawn_blocking(move || deactivate_share_links(state_clone, payload)).await {
            Ok(Ok(execution)) => execution,
            Ok(Err(err)) => {
                warn!(job_id = %job.id, error = %err, "share link sweep will retry");
                JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: err,
                }
            }
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "share link sweep panicked");
                JobExecution::Retry {
                    delay: Duration::from_secs(60),
                    error: format!("worker panicked: {join_err}"),
                }
            }
        }
    }
}

fn deactivate_share_links(
    state: Arc<AppState>,
    payload: DeactivatePayload,
) -> Result<JobExecution, String> {
    let mut conn = state.db().map_err(|err| format!("{err:?}"))?;
    let now = Utc::now().naive_utc();

    let expired = diesel::update(
        share_links::table
            .filter(share_links::is_active.eq(true))
            .filter(share_links::expires_at.le(now)),
    )
    .set((
        share_links::is_active.eq(false),
        share_links::updated_at.eq(now),
    ))
    .execute(&mut conn)
    .map_err(|err| format!("{err:?}"))?;

    let used_up = diesel::update(
        share_links::table
            .filter(share_links::is_active.eq(true))
            .filter(share_links::max_uses.is_not_null())
            .filter(share_links::current_uses.nullable().ge(share_links::max_uses)),
    )
    .set((
        share_links::is_active.eq(false),
        share_links::updated_at.eq(now),
    ))
    .execute(&mut conn)
    .map_err(|err| format!("{err:?}"))?;

    if expired + used_up > 0 {
        info!(expired, used_up, "share links deactivated");
    }

    let interval = payload
        .sweep_interval_secs
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    let next_run = now + ChronoDuration::seconds(interval as i64);

    enqueue_job(
        &mut conn,
        JOB_DEACTIVATE_SHARE_LINKS,
        serde_json::json!({ "sweep_interval_secs": interval }),
        Some(next_run),
    )
    .map_err(|err| err.to_string())?;

    Ok(JobExecution::Success)
}
