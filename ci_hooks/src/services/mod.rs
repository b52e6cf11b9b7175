//! Hook services — the actions a build event fans out to, and the plumbing
//! (clients, cache, retry, queue, worker) they run on.

pub mod failure_classifier;
pub mod gitlab_service;
pub mod log_archiver;
pub mod opensearch_service;
pub mod retry;
pub mod task_queue;
pub mod timing_service;
pub mod ttl_cache;
pub mod worker;
