//! OpenSearch integration — job log documents in day-partitioned indices.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::HookConfig;
use crate::models::job_log::{JobLogKey, JobLogRecord};
use crate::models::taxonomy::TaxonomyLabel;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("search index returned {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("search index request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Storage for archived job logs.
#[async_trait]
pub trait LogIndex: Send + Sync {
    /// Write `record` under `id` into the index for its day.
    async fn put(&self, id: &str, record: &JobLogRecord) -> Result<(), IndexError>;

    /// Attach `label` to the failed-job record for `key`. Returns the number
    /// of records updated; zero means it has not been archived yet.
    async fn attach_label(&self, key: JobLogKey, label: TaxonomyLabel)
        -> Result<u64, IndexError>;
}

pub struct OpenSearchClient {
    http: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
    index_prefix: String,
}

#[derive(Debug, Deserialize)]
struct UpdateByQueryResponse {
    #[serde(default)]
    updated: u64,
}

impl OpenSearchClient {
    pub fn new(config: &HookConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("centrix-ci-hooks")
            .build()?;

        Ok(Self {
            http,
            endpoint: config.opensearch_endpoint.clone(),
            username: config.opensearch_username.clone(),
            password: config.opensearch_password.clone(),
            index_prefix: config.log_index_prefix.clone(),
        })
    }

    async fn check(url: &str, resp: reqwest::Response) -> Result<reqwest::Response, IndexError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(IndexError::Status {
            status,
            url: url.to_string(),
            body,
        })
    }
}

#[async_trait]
impl LogIndex for OpenSearchClient {
    async fn put(&self, id: &str, record: &JobLogRecord) -> Result<(), IndexError> {
        let index = record.index_name(&self.index_prefix);
        let url = format!("{}/{}/_doc/{}", self.endpoint, index, id);

        let resp = self
            .http
            .put(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(record)
            .send()
            .await?;
        Self::check(&url, resp).await?;

        tracing::debug!(index = %index, id, job_id = record.job_id, "Indexed job log");
        Ok(())
    }

    async fn attach_label(
        &self,
        key: JobLogKey,
        label: TaxonomyLabel,
    ) -> Result<u64, IndexError> {
        let url = format!(
            "{}/{}-*/_update_by_query?conflicts=proceed&refresh=true",
            self.endpoint, self.index_prefix
        );
        let body = json!({
            "query": {
                "bool": {
                    "filter": [
                        { "term": { "job_id": key.job_id } },
                        { "term": { "pipeline_id": key.pipeline_id } },
                        { "term": { "status": "failed" } }
                    ]
                }
            },
            "script": {
                "source": "ctx._source.error_taxonomy = params.label",
                "lang": "painless",
                "params": { "label": label.as_str() }
            }
        });

        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await?;
        let resp = Self::check(&url, resp).await?;
        let result: UpdateByQueryResponse = resp.json().await?;
        Ok(result.updated)
    }
}
