//! Hook service data models.

pub mod event;
pub mod job_log;
pub mod task;
pub mod taxonomy;
pub mod timer;
