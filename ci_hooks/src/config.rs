//! Hook service configuration — loaded from environment variables.
//!
//! Every external endpoint is required; the process refuses to start when
//! one is missing rather than failing on the first webhook.

use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {var} has invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct HookConfig {
    /// GitLab base URL, e.g. `https://gitlab.example.com`.
    pub gitlab_url: String,
    /// GitLab API token (sent as `PRIVATE-TOKEN`).
    pub gitlab_token: String,
    /// Per-request timeout for GitLab reads.
    pub gitlab_timeout: Duration,
    /// OpenSearch endpoint for job log documents.
    pub opensearch_endpoint: String,
    pub opensearch_username: String,
    pub opensearch_password: String,
    /// Prefix of the day-partitioned log indices.
    pub log_index_prefix: String,
    /// PostgreSQL URL for timing records.
    pub database_url: String,
    /// PostgreSQL URL backing the task queue.
    pub task_broker_url: String,
    /// Shared secret expected in `X-Gitlab-Token`. Empty disables the check.
    pub webhook_token: String,
    /// Number of in-process task workers.
    pub workers: usize,
    /// Idle sleep between task queue polls.
    pub poll_interval: Duration,
    /// Delay before a classification that raced its archive is retried.
    pub classify_retry_delay: Duration,
    pub classify_max_attempts: i32,
}

impl HookConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let config = Self {
            gitlab_url: required("GITLAB_URL")?.trim_end_matches('/').to_string(),
            gitlab_token: required("GITLAB_TOKEN")?,
            gitlab_timeout: Duration::from_secs(parse_or(&lookup, "GITLAB_TIMEOUT_SECS", 30)?),
            opensearch_endpoint: required("OPENSEARCH_ENDPOINT")?
                .trim_end_matches('/')
                .to_string(),
            opensearch_username: required("OPENSEARCH_USERNAME")?,
            opensearch_password: required("OPENSEARCH_PASSWORD")?,
            log_index_prefix: lookup("CI_LOG_INDEX_PREFIX")
                .unwrap_or_else(|| "gitlab-job-logs".to_string()),
            database_url: required("DATABASE_URL")?,
            task_broker_url: required("TASK_BROKER_URL")?,
            webhook_token: lookup("CI_WEBHOOK_TOKEN").unwrap_or_default(),
            workers: parse_or(&lookup, "CI_HOOK_WORKERS", 4)?,
            poll_interval: Duration::from_secs(parse_or(&lookup, "CI_TASK_POLL_SECS", 5)?),
            classify_retry_delay: Duration::from_secs(parse_or(
                &lookup,
                "CI_CLASSIFY_RETRY_SECS",
                30,
            )?),
            classify_max_attempts: parse_or(&lookup, "CI_CLASSIFY_MAX_ATTEMPTS", 10)?,
        };

        if config.webhook_token.is_empty() {
            tracing::warn!("CI_WEBHOOK_TOKEN not set -- webhook token validation disabled");
        }

        Ok(config)
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> HookConfig {
    HookConfig {
        gitlab_url: "http://gitlab.invalid".to_string(),
        gitlab_token: "token".to_string(),
        gitlab_timeout: Duration::from_secs(5),
        opensearch_endpoint: "http://opensearch.invalid".to_string(),
        opensearch_username: "admin".to_string(),
        opensearch_password: "admin".to_string(),
        log_index_prefix: "gitlab-job-logs".to_string(),
        database_url: "postgres://localhost/ci".to_string(),
        task_broker_url: "postgres://localhost/ci".to_string(),
        webhook_token: String::new(),
        workers: 1,
        poll_interval: Duration::from_millis(10),
        classify_retry_delay: Duration::from_secs(30),
        classify_max_attempts: 10,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn full_env() -> HashMap<&'static str, String> {
        [
            ("GITLAB_URL", "https://gitlab.example.com/"),
            ("GITLAB_TOKEN", "glpat-123"),
            ("OPENSEARCH_ENDPOINT", "https://search.example.com"),
            ("OPENSEARCH_USERNAME", "ingest"),
            ("OPENSEARCH_PASSWORD", "secret"),
            ("DATABASE_URL", "postgres://ci@db/analytics"),
            ("TASK_BROKER_URL", "postgres://ci@db/tasks"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }

    #[test]
    fn loads_required_values_and_defaults() {
        let env = full_env();
        let config = HookConfig::from_lookup(|k| env.get(k).cloned()).unwrap();

        assert_eq!(config.gitlab_url, "https://gitlab.example.com");
        assert_eq!(config.log_index_prefix, "gitlab-job-logs");
        assert_eq!(config.workers, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.classify_max_attempts, 10);
        assert!(config.webhook_token.is_empty());
    }

    #[test]
    fn fails_fast_on_missing_endpoint() {
        for var in ["GITLAB_TOKEN", "OPENSEARCH_ENDPOINT", "TASK_BROKER_URL"] {
            let mut env = full_env();
            env.remove(var);
            let err = HookConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
            assert_eq!(err, ConfigError::Missing(var));
        }
    }

    #[test]
    fn blank_required_value_counts_as_missing() {
        let mut env = full_env();
        env.insert("DATABASE_URL", "  ".to_string());
        let err = HookConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn rejects_unparsable_numbers() {
        let mut env = full_env();
        env.insert("CI_HOOK_WORKERS", "many".to_string());
        let err = HookConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "CI_HOOK_WORKERS", .. }));
    }
}
