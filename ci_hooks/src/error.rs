//! Errors raised while executing dispatched hook tasks.

use crate::services::gitlab_service::FetchError;
use crate::services::opensearch_service::IndexError;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The timing report is not in the job's artifact archive.
    #[error("artifact {path} not found for job {job_id}")]
    ArtifactNotFound { job_id: i64, path: String },

    /// Classification ran before the job's log was archived.
    #[error("no archived log yet for job {job_id} in pipeline {pipeline_id}")]
    ClassificationRace { job_id: i64, pipeline_id: i64 },

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("search index: {0}")]
    Index(#[from] IndexError),

    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    /// Transient errors are deferred and retried; everything else fails the
    /// task for good (queue redelivery, if any, is not ours to do).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ClassificationRace { .. })
    }
}
