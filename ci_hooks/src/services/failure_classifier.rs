//! Failure classification of job logs against the error taxonomy.
//!
//! `classify` is a pure function of the log text. Rules are checked in
//! order and the first match wins, so infrastructure causes (OOM, pod and
//! network trouble) are listed before build causes that tend to show up in
//! the same log as a consequence.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::TaskError;
use crate::models::event::BuildEvent;
use crate::models::job_log::JobLogKey;
use crate::models::taxonomy::TaxonomyLabel;
use crate::services::gitlab_service::{CiPlatform, JobRef};
use crate::services::log_archiver::strip_ansi;
use crate::services::opensearch_service::LogIndex;

struct Rule {
    label: TaxonomyLabel,
    pattern: Regex,
}

fn rule(label: TaxonomyLabel, pattern: &str) -> Rule {
    Rule {
        label,
        pattern: Regex::new(pattern).unwrap(),
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use TaxonomyLabel::*;
    vec![
        rule(OomKilled, r"(?i)OOMKilled|Out of memory: Killed process|exit code 137"),
        rule(
            PodTimeout,
            r"(?i)timed out waiting for pod to start|pod status is Pending",
        ),
        rule(
            ImagePullFailure,
            r"(?i)ImagePullBackOff|ErrImagePull|failed to pull image",
        ),
        rule(
            GitlabDown,
            r"(?i)502 Bad Gateway|503 Service Unavailable|GitLab is not responding",
        ),
        rule(NetworkTimeout, r"(?i)read operation timed out|Read timed out|Connection timed out"),
        rule(ConnectionReset, r"(?i)Connection reset by peer|RemoteDisconnected"),
        rule(
            DnsFailure,
            r"(?i)Temporary failure in name resolution|Could not resolve host",
        ),
        rule(NoSpaceLeft, r"(?i)No space left on device"),
        rule(
            ArtifactUploadFailure,
            r"(?i)Uploading artifacts.*(?:failed|error)|ERROR: Uploading artifacts",
        ),
        rule(
            ConcretizationError,
            r"(?i)UnsatisfiableSpecError|concretization failed|Error: concretizer",
        ),
        rule(ModuleNotFound, r"ModuleNotFoundError|ImportError: No module named"),
        rule(
            BuildcacheFetchFailure,
            r"(?i)FetchCacheError|Failed to fetch .* from (?:buildcache|mirror)",
        ),
        rule(SpecNotFound, r"(?i)No such spec|Unable to find spec|spec .* not found"),
        rule(
            JobScriptTimeout,
            r"(?i)execution took longer than .* seconds|job's timeout",
        ),
        rule(TestFailure, r"(?i)\btests? failed\b|FAILED \(failures="),
        rule(
            CompilerError,
            r"(?i)\berror: |compilation terminated|collect2: error|\*\*\* \[.*\] Error \d+",
        ),
    ]
});

/// Label of the first rule matching `log`, if any.
pub fn classify(log: &str) -> Option<TaxonomyLabel> {
    RULES
        .iter()
        .find(|rule| rule.pattern.is_match(log))
        .map(|rule| rule.label)
}

/// Classify a failed job's log and attach the label to its archived record.
///
/// Returns the label (if any). When the archive for this job has not been
/// written yet the update matches nothing and the task reports a
/// [`TaskError::ClassificationRace`] so the worker can retry it later.
pub async fn classify_job(
    platform: &dyn CiPlatform,
    index: &dyn LogIndex,
    event: &BuildEvent,
) -> Result<Option<TaxonomyLabel>, TaskError> {
    let job = JobRef {
        project_id: event.project_id,
        job_id: event.build_id,
    };
    let raw = platform.fetch_log(job).await?;
    let Some(label) = classify(&strip_ansi(&raw)) else {
        tracing::info!(build_id = event.build_id, "No taxonomy rule matched");
        crate::metrics::failure_classified("none");
        return Ok(None);
    };

    let key = JobLogKey::from(event);
    let updated = index.attach_label(key, label).await?;
    if updated == 0 {
        return Err(TaskError::ClassificationRace {
            job_id: key.job_id,
            pipeline_id: key.pipeline_id,
        });
    }

    tracing::info!(
        build_id = event.build_id,
        pipeline_id = event.pipeline_id,
        label = %label,
        "Failure classified"
    );
    crate::metrics::failure_classified(label.as_str());
    Ok(Some(label))
}
