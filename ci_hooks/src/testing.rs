//! In-memory doubles of the external seams, shared by unit tests.

use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use crate::config::test_config;
use crate::context::HookContext;
use crate::models::event::BuildEvent;
use crate::models::job_log::{JobLogKey, JobLogRecord};
use crate::models::task::{ClaimedTask, HookTask, TaskKind};
use crate::models::taxonomy::TaxonomyLabel;
use crate::models::timer::{CiTimer, CiTimerPhase, NewCiTimer, PhaseDraft};
use crate::services::gitlab_service::{CiPlatform, FetchError, JobRef};
use crate::services::opensearch_service::{IndexError, LogIndex};
use crate::services::task_queue::TaskQueue;
use crate::services::timing_service::{InsertOutcome, TimerStore, TimerWithPhases, TIMING_REPORT_PATH};

/// Serves the same log and artifact archive for every job.
pub struct StaticPlatform {
    log: String,
    archive: Option<Bytes>,
}

impl StaticPlatform {
    pub fn with_log(log: &str) -> Self {
        Self {
            log: log.to_string(),
            archive: None,
        }
    }

    pub fn with_archive(archive: impl Into<Bytes>) -> Self {
        Self::with_log("").archive(archive)
    }

    pub fn archive(mut self, archive: impl Into<Bytes>) -> Self {
        self.archive = Some(archive.into());
        self
    }
}

#[async_trait]
impl CiPlatform for StaticPlatform {
    async fn fetch_log(&self, _job: JobRef) -> Result<String, FetchError> {
        Ok(self.log.clone())
    }

    async fn fetch_artifact_archive(&self, job: JobRef) -> Result<Bytes, FetchError> {
        self.archive.clone().ok_or_else(|| FetchError::NotFound {
            url: format!("static://jobs/{}/artifacts", job.job_id),
        })
    }
}

#[derive(Default)]
pub struct MemoryLogIndex {
    docs: Mutex<Vec<(String, JobLogRecord)>>,
}

impl MemoryLogIndex {
    /// Store an archived record for `event` as the archiver would.
    pub fn seed(&self, event: &BuildEvent, log: &str) {
        let record = JobLogRecord::from_event(event, log.to_string());
        let id = format!("seed-{}", event.build_id);
        self.docs.lock().unwrap().push((id, record));
    }

    pub fn records(&self) -> Vec<JobLogRecord> {
        self.docs.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.docs.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }
}

#[async_trait]
impl LogIndex for MemoryLogIndex {
    async fn put(&self, id: &str, record: &JobLogRecord) -> Result<(), IndexError> {
        self.docs.lock().unwrap().push((id.to_string(), record.clone()));
        Ok(())
    }

    async fn attach_label(&self, key: JobLogKey, label: TaxonomyLabel) -> Result<u64, IndexError> {
        let mut docs = self.docs.lock().unwrap();
        let mut updated = 0;
        for (_, record) in docs.iter_mut() {
            if record.job_id == key.job_id
                && record.pipeline_id == key.pipeline_id
                && record.accepts_label()
            {
                record.error_taxonomy = Some(label);
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[derive(Default)]
struct TimerTables {
    timers: Vec<CiTimer>,
    phases: Vec<CiTimerPhase>,
}

/// Timer store enforcing the (job, name, hash) uniqueness in memory.
#[derive(Default)]
pub struct MemoryTimerStore {
    tables: Mutex<TimerTables>,
    rejected: Mutex<Vec<String>>,
}

impl MemoryTimerStore {
    /// Make inserts of timers named `name` fail as a database error would.
    pub fn reject(&self, name: &str) {
        self.rejected.lock().unwrap().push(name.to_string());
    }

    pub fn timer_count(&self) -> usize {
        self.tables.lock().unwrap().timers.len()
    }

    pub fn phase_count(&self) -> usize {
        self.tables.lock().unwrap().phases.len()
    }
}

#[async_trait]
impl TimerStore for MemoryTimerStore {
    async fn insert_if_absent(
        &self,
        timer: NewCiTimer,
        phases: Vec<PhaseDraft>,
    ) -> anyhow::Result<InsertOutcome> {
        if self.rejected.lock().unwrap().contains(&timer.name) {
            anyhow::bail!("connection refused");
        }
        let mut tables = self.tables.lock().unwrap();
        let exists = tables
            .timers
            .iter()
            .any(|t| t.job_id == timer.job_id && t.name == timer.name && t.hash == timer.hash);
        if exists {
            return Ok(InsertOutcome::AlreadyPresent);
        }

        let timer_id = tables.timers.len() as i64 + 1;
        tables.timers.push(CiTimer {
            id: timer_id,
            job_id: timer.job_id,
            name: timer.name,
            hash: timer.hash,
            cache: timer.cache,
            time_total: timer.time_total,
            create_date: Some(Utc::now()),
        });
        for draft in phases {
            let row = draft.into_row(timer_id);
            let id = tables.phases.len() as i64 + 1;
            tables.phases.push(CiTimerPhase {
                id,
                timer_id: row.timer_id,
                name: row.name,
                path: row.path,
                is_subphase: row.is_subphase,
                time_total: row.time_total,
                count: row.count,
            });
        }
        Ok(InsertOutcome::Created(timer_id))
    }

    async fn list_for_job(&self, job_id: i64) -> anyhow::Result<Vec<TimerWithPhases>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .timers
            .iter()
            .filter(|t| t.job_id == job_id)
            .map(|timer| TimerWithPhases {
                timer: timer.clone(),
                phases: tables
                    .phases
                    .iter()
                    .filter(|p| p.timer_id == timer.id)
                    .cloned()
                    .collect(),
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTaskState {
    Pending,
    Running,
    Done,
    Failed,
}

struct MemoryTask {
    id: i64,
    task: HookTask,
    state: MemoryTaskState,
    attempts: i32,
    run_after: Instant,
}

/// Task queue that never waits: a deferred task is claimable at once, but
/// pending tasks are still claimed in `run_after` order.
#[derive(Default)]
pub struct MemoryTaskQueue {
    tasks: Mutex<Vec<MemoryTask>>,
    rejected: Mutex<Vec<TaskKind>>,
}

impl MemoryTaskQueue {
    /// Make `enqueue` fail for tasks of `kind`.
    pub fn reject(&self, kind: TaskKind) {
        self.rejected.lock().unwrap().push(kind);
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        self.tasks.lock().unwrap().iter().map(|t| t.task.kind).collect()
    }

    pub fn max_attempts_of(&self, kind: TaskKind) -> Option<i32> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.task.kind == kind)
            .map(|t| t.task.max_attempts)
    }

    pub fn state_of(&self, id: i64) -> Option<MemoryTaskState> {
        self.with_task(id, |t| t.state)
    }

    pub fn attempts_of(&self, id: i64) -> Option<i32> {
        self.with_task(id, |t| t.attempts)
    }

    fn with_task<T>(&self, id: i64, f: impl FnOnce(&MemoryTask) -> T) -> Option<T> {
        self.tasks.lock().unwrap().iter().find(|t| t.id == id).map(f)
    }

    fn set_state(&self, id: i64, state: MemoryTaskState, run_after: Option<Instant>) -> anyhow::Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow::anyhow!("no task {id}"))?;
        task.state = state;
        if let Some(run_after) = run_after {
            task.run_after = run_after;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task: HookTask) -> anyhow::Result<i64> {
        if self.rejected.lock().unwrap().contains(&task.kind) {
            anyhow::bail!("broker unavailable");
        }
        let mut tasks = self.tasks.lock().unwrap();
        let id = tasks.len() as i64 + 1;
        tasks.push(MemoryTask {
            id,
            task,
            state: MemoryTaskState::Pending,
            attempts: 0,
            run_after: Instant::now(),
        });
        Ok(id)
    }

    async fn claim(&self) -> anyhow::Result<Option<ClaimedTask>> {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks
            .iter_mut()
            .filter(|t| t.state == MemoryTaskState::Pending)
            .min_by_key(|t| (t.run_after, t.id))
        else {
            return Ok(None);
        };

        task.state = MemoryTaskState::Running;
        task.attempts += 1;
        Ok(Some(ClaimedTask {
            id: task.id,
            kind: task.task.kind,
            event: task.task.event.clone(),
            attempt: task.attempts,
            max_attempts: task.task.max_attempts,
        }))
    }

    async fn complete(&self, task_id: i64) -> anyhow::Result<()> {
        self.set_state(task_id, MemoryTaskState::Done, None)
    }

    async fn defer(&self, task_id: i64, delay: Duration, _error: &str) -> anyhow::Result<()> {
        self.set_state(task_id, MemoryTaskState::Pending, Some(Instant::now() + delay))
    }

    async fn fail(&self, task_id: i64, _error: &str) -> anyhow::Result<()> {
        self.set_state(task_id, MemoryTaskState::Failed, None)
    }
}

/// Handles on the doubles behind a [`test_context`].
pub struct MemoryBackends {
    pub index: Arc<MemoryLogIndex>,
    pub timers: Arc<MemoryTimerStore>,
    pub queue: Arc<MemoryTaskQueue>,
}

pub fn test_context(platform: StaticPlatform) -> (HookContext, MemoryBackends) {
    let mem = MemoryBackends {
        index: Arc::new(MemoryLogIndex::default()),
        timers: Arc::new(MemoryTimerStore::default()),
        queue: Arc::new(MemoryTaskQueue::default()),
    };
    let ctx = HookContext {
        config: test_config(),
        platform: Arc::new(platform),
        index: mem.index.clone(),
        timers: mem.timers.clone(),
        queue: mem.queue.clone(),
    };
    (ctx, mem)
}

/// Zip archive holding the given files.
pub fn zip_with(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Artifact archive carrying `report` at the timing report path.
pub fn timing_archive(report: &serde_json::Value) -> Vec<u8> {
    let body = serde_json::to_vec(report).unwrap();
    zip_with(&[(TIMING_REPORT_PATH, body.as_slice())])
}
