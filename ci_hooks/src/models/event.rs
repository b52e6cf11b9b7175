//! GitLab job ("build") webhook payload.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Numbered build stages (`stage-0`, `stage-12`) run the actual package
/// builds; generate/setup jobs use other stage names.
static NUMBERED_STAGE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^stage-\d+$").unwrap());

/// Job status as reported by GitLab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Success,
    Failed,
    Created,
    Pending,
    Running,
    Canceled,
    Skipped,
    Manual,
    #[serde(other)]
    Unknown,
}

impl BuildStatus {
    /// Terminal statuses never transition again; only these trigger work.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
            Self::Manual => "manual",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventProject {
    pub web_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCommit {
    #[serde(default)]
    pub sha: Option<String>,
}

/// A job state transition. Missing required fields fail deserialization,
/// which the gate turns into a 400.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildEvent {
    pub object_kind: String,
    pub build_id: i64,
    pub build_stage: String,
    pub build_status: BuildStatus,
    pub project_id: i64,
    pub pipeline_id: i64,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub project: EventProject,
    #[serde(default)]
    pub build_name: Option<String>,
    #[serde(default, with = "gitlab_time")]
    pub build_started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "gitlab_time")]
    pub build_finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub build_duration: Option<f64>,
    #[serde(default)]
    pub build_failure_reason: Option<String>,
    #[serde(default)]
    pub commit: Option<EventCommit>,
}

impl BuildEvent {
    pub fn is_numbered_stage(&self) -> bool {
        NUMBERED_STAGE_REGEX.is_match(&self.build_stage)
    }

    /// Browser URL of the job page.
    pub fn job_url(&self) -> String {
        format!(
            "{}/-/jobs/{}",
            self.project.web_url.trim_end_matches('/'),
            self.build_id
        )
    }
}

/// GitLab hooks send `2021-02-23 02:41:37 UTC`; API payloads and replays
/// use RFC 3339. Accept both, serialize as RFC 3339.
mod gitlab_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(Some(ts.with_timezone(&Utc)));
        }
        let trimmed = raw.trim_end_matches(" UTC");
        NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
            .map(|naive| Some(naive.and_utc()))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) fn sample_event(status: BuildStatus, stage: &str) -> BuildEvent {
    BuildEvent {
        object_kind: "build".to_string(),
        build_id: 4_411_001,
        build_stage: stage.to_string(),
        build_status: status,
        project_id: 2,
        pipeline_id: 98_765,
        ref_name: "develop".to_string(),
        project: EventProject {
            web_url: "https://gitlab.example.com/spack/spack".to_string(),
        },
        build_name: Some("zlib@1.3 /abcdef".to_string()),
        build_started_at: None,
        build_finished_at: None,
        build_duration: None,
        build_failure_reason: None,
        commit: None,
    }
}
