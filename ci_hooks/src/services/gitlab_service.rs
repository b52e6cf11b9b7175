//! GitLab integration — job logs and artifact archives.
//!
//! The authenticated handle and project/job lookups are memoized for 30
//! minutes so a burst of webhooks for one pipeline costs one handshake.
//! Every read goes through the fetch retry policy: a read timeout is
//! retried forever, anything else propagates.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::HookConfig;
use crate::models::event::BuildEvent;
use crate::services::retry::RetryPolicy;
use crate::services::ttl_cache::TtlCache;

const LOOKUP_TTL: Duration = Duration::from_secs(30 * 60);
const LOOKUP_CAPACITY: usize = 4096;

/// Identifies a job on the CI platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobRef {
    pub project_id: i64,
    pub job_id: i64,
}

impl From<&BuildEvent> for JobRef {
    fn from(event: &BuildEvent) -> Self {
        Self {
            project_id: event.project_id,
            job_id: event.build_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("read timed out: {url}")]
    Timeout { url: String },
    #[error("not found: {url}")]
    NotFound { url: String },
    #[error("GitLab returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Http {
                url: url.to_string(),
                source,
            }
        }
    }

    pub fn is_read_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Retry policy for GitLab reads: timeouts forever, no delay.
pub fn fetch_retry_policy() -> RetryPolicy<FetchError> {
    RetryPolicy::forever(FetchError::is_read_timeout)
}

/// Read access to the CI platform.
#[async_trait]
pub trait CiPlatform: Send + Sync {
    /// Raw console log of a job.
    async fn fetch_log(&self, job: JobRef) -> Result<String, FetchError>;

    /// Zip archive of a job's artifacts.
    async fn fetch_artifact_archive(&self, job: JobRef) -> Result<Bytes, FetchError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitlabUser {
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitlabProject {
    pub id: i64,
    #[serde(default)]
    pub path_with_namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitlabJob {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
}

pub struct GitlabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetryPolicy<FetchError>,
    session: TtlCache<(), GitlabUser>,
    projects: TtlCache<i64, GitlabProject>,
    jobs: TtlCache<JobRef, GitlabJob>,
}

impl GitlabClient {
    pub fn new(config: &HookConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.gitlab_timeout)
            // Idle limit per read; a slow but live body is never cut off.
            .read_timeout(config.gitlab_timeout)
            .user_agent("centrix-ci-hooks")
            .build()?;

        Ok(Self {
            http,
            base_url: config.gitlab_url.clone(),
            token: config.gitlab_token.clone(),
            retry: fetch_retry_policy(),
            session: TtlCache::new(1, LOOKUP_TTL),
            projects: TtlCache::new(LOOKUP_CAPACITY, LOOKUP_TTL),
            jobs: TtlCache::new(LOOKUP_CAPACITY, LOOKUP_TTL),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let resp = self
            .http
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        match resp.status() {
            s if s.is_success() => Ok(resp),
            reqwest::StatusCode::NOT_FOUND => Err(FetchError::NotFound {
                url: url.to_string(),
            }),
            s => Err(FetchError::Status {
                status: s.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        self.retry
            .run(|| async move {
                self.get(url)
                    .await?
                    .json::<T>()
                    .await
                    .map_err(|e| FetchError::from_reqwest(url, e))
            })
            .await
    }

    /// Authenticated handle. Validates the token once per TTL.
    pub async fn session(&self) -> Result<GitlabUser, FetchError> {
        self.session
            .get_or_try_insert((), || async move {
                let user: GitlabUser = self.get_json(&self.api_url("/user")).await?;
                tracing::info!(user = %user.username, "Authenticated against GitLab");
                Ok(user)
            })
            .await
    }

    pub async fn project(&self, project_id: i64) -> Result<GitlabProject, FetchError> {
        self.projects
            .get_or_try_insert(project_id, || async move {
                self.get_json(&self.api_url(&format!("/projects/{project_id}")))
                    .await
            })
            .await
    }

    pub async fn job(&self, job: JobRef) -> Result<GitlabJob, FetchError> {
        self.jobs
            .get_or_try_insert(job, || async move {
                self.get_json(&self.api_url(&format!(
                    "/projects/{}/jobs/{}",
                    job.project_id, job.job_id
                )))
                .await
            })
            .await
    }

    /// Resolve handle, project and job before touching the job's files.
    async fn resolve(&self, job: JobRef) -> Result<(GitlabProject, GitlabJob), FetchError> {
        self.session().await?;
        let project = self.project(job.project_id).await?;
        let job = self.job(job).await?;
        Ok((project, job))
    }
}

#[async_trait]
impl CiPlatform for GitlabClient {
    async fn fetch_log(&self, job: JobRef) -> Result<String, FetchError> {
        let (project, job) = self.resolve(job).await?;
        let url = self.api_url(&format!("/projects/{}/jobs/{}/trace", project.id, job.id));
        let url = url.as_str();
        tracing::debug!(
            project = %project.path_with_namespace,
            job = %job.name,
            status = %job.status,
            "Fetching job log"
        );

        self.retry
            .run(|| async move {
                self.get(url)
                    .await?
                    .text()
                    .await
                    .map_err(|e| FetchError::from_reqwest(url, e))
            })
            .await
    }

    async fn fetch_artifact_archive(&self, job: JobRef) -> Result<Bytes, FetchError> {
        let (project, job) = self.resolve(job).await?;
        let url = self.api_url(&format!(
            "/projects/{}/jobs/{}/artifacts",
            project.id, job.id
        ));
        let url = url.as_str();

        let archive = self
            .retry
            .run(|| async move {
                self.get(url)
                    .await?
                    .bytes()
                    .await
                    .map_err(|e| FetchError::from_reqwest(url, e))
            })
            .await?;

        tracing::debug!(
            project = %project.path_with_namespace,
            job_id = job.id,
            size = archive.len(),
            "Downloaded artifact archive"
        );
        Ok(archive)
    }
}
