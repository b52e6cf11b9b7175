//! Job log archival into the search index.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::TaskError;
use crate::models::event::BuildEvent;
use crate::models::job_log::JobLogRecord;
use crate::services::gitlab_service::{CiPlatform, JobRef};
use crate::services::opensearch_service::LogIndex;

/// SGR and cursor-movement sequences with at most two parameters. Longer
/// parameter lists leave their tail behind (`\x1b[0;1;32m` -> `;32m`);
/// consumers of the archived logs already tolerate that residue.
static ANSI_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[([0-9]{1,3}(;[0-9]{1,3})?)?[mGKHJABCDF]?").unwrap());

pub fn strip_ansi(text: &str) -> String {
    ANSI_REGEX.replace_all(text, "").into_owned()
}

/// Fetch the job's log, normalize it and write a new record. Returns the
/// generated document id.
pub async fn archive(
    platform: &dyn CiPlatform,
    index: &dyn LogIndex,
    event: &BuildEvent,
) -> Result<String, TaskError> {
    let job = JobRef {
        project_id: event.project_id,
        job_id: event.build_id,
    };
    let raw = platform.fetch_log(job).await?;
    let log = strip_ansi(&raw);
    let size = log.len();

    let record = JobLogRecord::from_event(event, log);
    let id = uuid::Uuid::new_v4().to_string();
    index.put(&id, &record).await?;

    crate::metrics::log_archived(size);
    tracing::info!(
        build_id = event.build_id,
        pipeline_id = event.pipeline_id,
        status = event.build_status.as_str(),
        doc_id = %id,
        "Job log archived"
    );
    Ok(id)
}
