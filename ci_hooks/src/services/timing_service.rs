//! Build timing extraction from job artifact archives.
//!
//! The build writes a JSON timing report into its artifacts. Each named
//! entry becomes one `ci_timers` row plus its `ci_timer_phases` children.
//! Re-ingesting the same archive is a no-op: the (job, name, hash) unique
//! constraint turns the timer insert into insert-or-skip, and phases are
//! only written when the timer row was created.

use std::io::{Cursor, Read};

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Serialize;

use crate::db::DbPool;
use crate::error::TaskError;
use crate::models::timer::{
    CiTimer, CiTimerPhase, NewCiTimer, NewCiTimerPhase, PhaseDraft, TimingEntry, TimingReport,
};
use crate::schema::{ci_timer_phases, ci_timers};
use crate::services::gitlab_service::{CiPlatform, JobRef};

/// Location of the timing report inside the artifact archive.
pub const TIMING_REPORT_PATH: &str = "jobs_scratch_dir/user_data/install_times.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(i64),
    AlreadyPresent,
}

/// A timer with its phases, as served by the timings API.
#[derive(Debug, Clone, Serialize)]
pub struct TimerWithPhases {
    #[serde(flatten)]
    pub timer: CiTimer,
    pub phases: Vec<CiTimerPhase>,
}

/// Persistence for build timings.
#[async_trait]
pub trait TimerStore: Send + Sync {
    /// Insert the timer and its phases together unless a timer for the same
    /// (job, name, hash) exists.
    async fn insert_if_absent(
        &self,
        timer: NewCiTimer,
        phases: Vec<PhaseDraft>,
    ) -> anyhow::Result<InsertOutcome>;

    async fn list_for_job(&self, job_id: i64) -> anyhow::Result<Vec<TimerWithPhases>>;
}

pub struct PgTimerStore {
    pool: DbPool,
}

impl PgTimerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TimerStore for PgTimerStore {
    async fn insert_if_absent(
        &self,
        timer: NewCiTimer,
        phases: Vec<PhaseDraft>,
    ) -> anyhow::Result<InsertOutcome> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;

        let outcome = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    let timer_id: Option<i64> = diesel::insert_into(ci_timers::table)
                        .values(&timer)
                        .on_conflict((ci_timers::job_id, ci_timers::name, ci_timers::hash))
                        .do_nothing()
                        .returning(ci_timers::id)
                        .get_result(conn)
                        .await
                        .optional()?;

                    let Some(timer_id) = timer_id else {
                        return Ok(InsertOutcome::AlreadyPresent);
                    };

                    let rows: Vec<NewCiTimerPhase> =
                        phases.into_iter().map(|p| p.into_row(timer_id)).collect();
                    if !rows.is_empty() {
                        diesel::insert_into(ci_timer_phases::table)
                            .values(&rows)
                            .execute(conn)
                            .await?;
                    }
                    Ok(InsertOutcome::Created(timer_id))
                }
                .scope_boxed()
            })
            .await?;

        Ok(outcome)
    }

    async fn list_for_job(&self, job_id: i64) -> anyhow::Result<Vec<TimerWithPhases>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;

        let timers = ci_timers::table
            .filter(ci_timers::job_id.eq(job_id))
            .order(ci_timers::id.asc())
            .select(CiTimer::as_select())
            .load::<CiTimer>(&mut conn)
            .await?;

        let timer_ids: Vec<i64> = timers.iter().map(|t| t.id).collect();
        let mut phases = ci_timer_phases::table
            .filter(ci_timer_phases::timer_id.eq_any(timer_ids))
            .order(ci_timer_phases::id.asc())
            .select(CiTimerPhase::as_select())
            .load::<CiTimerPhase>(&mut conn)
            .await?;

        Ok(timers
            .into_iter()
            .map(|timer| {
                let (own, rest): (Vec<_>, Vec<_>) =
                    phases.drain(..).partition(|p| p.timer_id == timer.id);
                phases = rest;
                TimerWithPhases { timer, phases: own }
            })
            .collect())
    }
}

/// Summary of one extraction run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub created: usize,
    pub already_present: usize,
    pub skipped_unnamed: usize,
    pub failed: usize,
}

/// Read the timing report out of a zip archive.
pub fn read_timing_report(archive: &[u8], job_id: i64) -> Result<TimingReport, TaskError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| TaskError::InvalidArtifact(format!("job {job_id}: {e}")))?;

    let mut file = match zip.by_name(TIMING_REPORT_PATH) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(TaskError::ArtifactNotFound {
                job_id,
                path: TIMING_REPORT_PATH.to_string(),
            })
        }
        Err(e) => return Err(TaskError::InvalidArtifact(format!("job {job_id}: {e}"))),
    };

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| TaskError::InvalidArtifact(format!("job {job_id}: {e}")))?;
    serde_json::from_str(&contents)
        .map_err(|e| TaskError::InvalidArtifact(format!("job {job_id}: {TIMING_REPORT_PATH}: {e}")))
}

/// Download the job's artifacts and store every timer they report.
pub async fn extract_and_store(
    platform: &dyn CiPlatform,
    store: &dyn TimerStore,
    job: JobRef,
) -> Result<ExtractionSummary, TaskError> {
    let archive = match platform.fetch_artifact_archive(job).await {
        Ok(archive) => archive,
        Err(e) if e.is_not_found() => {
            return Err(TaskError::ArtifactNotFound {
                job_id: job.job_id,
                path: TIMING_REPORT_PATH.to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    let report = read_timing_report(&archive, job.job_id)?;
    let mut summary = ExtractionSummary::default();

    for (position, raw) in report.into_entries().into_iter().enumerate() {
        let entry: TimingEntry = match serde_json::from_value(raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(job_id = job.job_id, position, "Malformed timing entry: {e}");
                summary.failed += 1;
                continue;
            }
        };
        let Some((timer, phases)) = entry.into_rows(job.job_id) else {
            summary.skipped_unnamed += 1;
            continue;
        };
        let name = timer.name.clone();

        match store.insert_if_absent(timer, phases).await {
            Ok(InsertOutcome::Created(timer_id)) => {
                tracing::debug!(job_id = job.job_id, timer_id, name = %name, "Timer stored");
                summary.created += 1;
            }
            Ok(InsertOutcome::AlreadyPresent) => summary.already_present += 1,
            Err(e) => {
                tracing::error!(job_id = job.job_id, name = %name, "Failed to store timer: {e}");
                summary.failed += 1;
            }
        }
    }

    crate::metrics::timers_ingested(summary.created, summary.already_present, summary.failed);
    tracing::info!(
        job_id = job.job_id,
        created = summary.created,
        already_present = summary.already_present,
        skipped_unnamed = summary.skipped_unnamed,
        failed = summary.failed,
        "Timing report ingested"
    );
    Ok(summary)
}
