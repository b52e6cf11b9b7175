//! Failure taxonomy labels attached to failed job logs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyLabel {
    OomKilled,
    PodTimeout,
    ImagePullFailure,
    GitlabDown,
    NetworkTimeout,
    ConnectionReset,
    DnsFailure,
    NoSpaceLeft,
    ArtifactUploadFailure,
    ConcretizationError,
    ModuleNotFound,
    BuildcacheFetchFailure,
    SpecNotFound,
    CompilerError,
    TestFailure,
    JobScriptTimeout,
}

impl TaxonomyLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OomKilled => "oom_killed",
            Self::PodTimeout => "pod_timeout",
            Self::ImagePullFailure => "image_pull_failure",
            Self::GitlabDown => "gitlab_down",
            Self::NetworkTimeout => "network_timeout",
            Self::ConnectionReset => "connection_reset",
            Self::DnsFailure => "dns_failure",
            Self::NoSpaceLeft => "no_space_left",
            Self::ArtifactUploadFailure => "artifact_upload_failure",
            Self::ConcretizationError => "concretization_error",
            Self::ModuleNotFound => "module_not_found",
            Self::BuildcacheFetchFailure => "buildcache_fetch_failure",
            Self::SpecNotFound => "spec_not_found",
            Self::CompilerError => "compiler_error",
            Self::TestFailure => "test_failure",
            Self::JobScriptTimeout => "job_script_timeout",
        }
    }
}

impl std::fmt::Display for TaxonomyLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
