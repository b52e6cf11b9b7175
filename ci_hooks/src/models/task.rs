//! ci.hook.task — Durable queue entries for dispatched hook actions.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::event::BuildEvent;
use crate::schema::ci_hook_tasks;

/// Downstream action a build event can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ArchiveLog,
    ClassifyFailure,
    ExtractTimings,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ArchiveLog => "archive_log",
            Self::ClassifyFailure => "classify_failure",
            Self::ExtractTimings => "extract_timings",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "archive_log" => Some(Self::ArchiveLog),
            "classify_failure" => Some(Self::ClassifyFailure),
            "extract_timings" => Some(Self::ExtractTimings),
            _ => None,
        }
    }
}

/// A unit of work submitted to the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct HookTask {
    pub kind: TaskKind,
    pub event: BuildEvent,
    /// Executions allowed before a transient failure becomes permanent.
    pub max_attempts: i32,
}

impl HookTask {
    pub fn new(kind: TaskKind, event: BuildEvent) -> Self {
        Self {
            kind,
            event,
            max_attempts: 1,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// The columns a worker needs from a claimed row. Status, schedule and
/// error bookkeeping are written by the queue but never read back.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_hook_tasks)]
pub struct CiHookTask {
    pub id: i64,
    pub kind: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ci_hook_tasks)]
pub struct NewCiHookTask {
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub max_attempts: i32,
}

/// A task handed to a worker. `attempt` counts this execution (1-based).
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedTask {
    pub id: i64,
    pub kind: TaskKind,
    pub event: BuildEvent,
    pub attempt: i32,
    pub max_attempts: i32,
}

impl ClaimedTask {
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }
}
