//! Job log document stored in the day-partitioned search index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{BuildEvent, BuildStatus};
use super::taxonomy::TaxonomyLabel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogRecord {
    pub job_id: i64,
    pub project_id: i64,
    pub pipeline_id: i64,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub job_name: Option<String>,
    pub stage: String,
    pub status: BuildStatus,
    pub job_url: String,
    pub log: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_taxonomy: Option<TaxonomyLabel>,
}

impl JobLogRecord {
    /// Build an unlabelled record. The timestamp is the event's finish time
    /// when GitLab supplied one, else the current time.
    pub fn from_event(event: &BuildEvent, log: String) -> Self {
        Self {
            job_id: event.build_id,
            project_id: event.project_id,
            pipeline_id: event.pipeline_id,
            ref_name: event.ref_name.clone(),
            job_name: event.build_name.clone(),
            stage: event.build_stage.clone(),
            status: event.build_status,
            job_url: event.job_url(),
            log,
            timestamp: event.build_finished_at.unwrap_or_else(Utc::now),
            error_taxonomy: None,
        }
    }

    /// Index receiving this record: `<prefix>-YYYYMMDD` of its timestamp.
    pub fn index_name(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.timestamp.format("%Y%m%d"))
    }

    /// Labels are only meaningful on failed jobs.
    #[cfg(test)]
    pub fn accepts_label(&self) -> bool {
        self.status == BuildStatus::Failed
    }
}

/// Key a classification update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobLogKey {
    pub job_id: i64,
    pub pipeline_id: i64,
}

impl From<&BuildEvent> for JobLogKey {
    fn from(event: &BuildEvent) -> Self {
        Self {
            job_id: event.build_id,
            pipeline_id: event.pipeline_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::event::sample_event;

    #[test]
    fn index_is_partitioned_by_finish_day() {
        let mut event = sample_event(BuildStatus::Failed, "stage-1");
        event.build_finished_at = Some(Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 59).unwrap());

        let record = JobLogRecord::from_event(&event, "log".to_string());
        assert_eq!(record.index_name("gitlab-job-logs"), "gitlab-job-logs-20240307");
        assert_eq!(record.job_url, event.job_url());
        assert!(record.accepts_label());
    }

    #[test]
    fn missing_finish_time_uses_now() {
        let event = sample_event(BuildStatus::Success, "stage-1");
        let before = Utc::now();
        let record = JobLogRecord::from_event(&event, String::new());
        assert!(record.timestamp >= before);
        assert!(!record.accepts_label());
    }

    #[test]
    fn serializes_timestamp_and_omits_empty_label() {
        let event = sample_event(BuildStatus::Success, "stage-1");
        let record = JobLogRecord::from_event(&event, "ok".to_string());
        let doc = serde_json::to_value(&record).unwrap();
        assert!(doc.get("@timestamp").is_some());
        assert_eq!(doc["ref"], "develop");
        assert_eq!(doc["status"], "success");
        assert!(doc.get("error_taxonomy").is_none());
    }
}
