//! ci.timer + ci.timer.phase — Per-package build timings from job artifacts.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{ci_timer_phases, ci_timers};

/// Separator of the hierarchical phase namespace (`install/configure`).
pub const PHASE_SEPARATOR: char = '/';

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = ci_timers)]
pub struct CiTimer {
    pub id: i64,
    pub job_id: i64,
    pub name: String,
    pub hash: String,
    pub cache: bool,
    pub time_total: f64,
    pub create_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = ci_timers)]
pub struct NewCiTimer {
    pub job_id: i64,
    pub name: String,
    pub hash: String,
    pub cache: bool,
    pub time_total: f64,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = ci_timer_phases)]
pub struct CiTimerPhase {
    pub id: i64,
    pub timer_id: i64,
    pub name: String,
    pub path: String,
    pub is_subphase: bool,
    pub time_total: f64,
    pub count: i32,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = ci_timer_phases)]
pub struct NewCiTimerPhase {
    pub timer_id: i64,
    pub name: String,
    pub path: String,
    pub is_subphase: bool,
    pub time_total: f64,
    pub count: i32,
}

/// Phase row before its parent timer id is known.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseDraft {
    pub name: String,
    pub path: String,
    pub is_subphase: bool,
    pub time_total: f64,
    pub count: i32,
}

impl PhaseDraft {
    pub fn into_row(self, timer_id: i64) -> NewCiTimerPhase {
        NewCiTimerPhase {
            timer_id,
            name: self.name,
            path: self.path,
            is_subphase: self.is_subphase,
            time_total: self.time_total,
            count: self.count,
        }
    }
}

/// One entry of the timing report written by the build.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub cache: bool,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub phases: Vec<TimingPhase>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingPhase {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub seconds: f64,
    #[serde(default = "default_count")]
    pub count: i32,
}

fn default_count() -> i32 {
    1
}

/// The report is normally a list of entries; older builds wrote a single
/// object. Entries are kept undecoded so one bad entry does not sink the
/// rest of the report.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimingReport {
    Many(Vec<serde_json::Value>),
    One(serde_json::Map<String, serde_json::Value>),
}

impl TimingReport {
    pub fn into_entries(self) -> Vec<serde_json::Value> {
        match self {
            Self::Many(entries) => entries,
            Self::One(entry) => vec![serde_json::Value::Object(entry)],
        }
    }
}

impl TimingEntry {
    /// Split into the timer row and its phase drafts. Entries without a
    /// name yield `None`.
    pub fn into_rows(self, job_id: i64) -> Option<(NewCiTimer, Vec<PhaseDraft>)> {
        let name = self.name.filter(|n| !n.is_empty())?;
        let timer = NewCiTimer {
            job_id,
            name,
            hash: self.hash,
            cache: self.cache,
            time_total: self.total,
        };
        let phases = self
            .phases
            .into_iter()
            .map(|phase| PhaseDraft {
                is_subphase: phase.path.contains(PHASE_SEPARATOR),
                name: phase.name,
                path: phase.path,
                time_total: phase.seconds,
                count: phase.count,
            })
            .collect();
        Some((timer, phases))
    }
}
