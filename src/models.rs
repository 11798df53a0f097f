use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Key-authenticated SSH endpoint the deploy runs against in remote mode.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    pub key_path: Option<PathBuf>,
}

impl RemoteTarget {
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Everything one invocation deploys. Immutable for the lifetime of the run.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub branch: String,
    pub pr_number: u32,
    pub repo_name: String,
    pub repo_url: String,
    pub app_port: u16,
    pub remote: Option<RemoteTarget>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub container_name: String,
    pub image_tag: String,
    pub host_port: u16,
    pub app_port: u16,
    pub workdir: String,
    pub log_path: String,
    pub mode: String,
    pub deployed_at: String,
}

#[derive(Debug)]
pub struct CmdOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Conditions that terminate the run with exit code 1. Everything else that
/// fails propagates as a plain error and exits 2.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("Dockerfile template not found at {0}")]
    TemplateMissing(String),
    #[error("failed to stage Dockerfile into {0}: {1}")]
    TemplateCopy(String, String),
    #[error("no free host port in {0}..={1}")]
    PortRangeExhausted(u16, u16),
    #[error("docker daemon is not available: {0}")]
    DaemonUnreachable(String),
}
