use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_BRANCH: &str = "deploy_branch";
pub const DEFAULT_PR_NUMBER: u32 = 1;
pub const DEFAULT_REPO_NAME: &str = "flask-example";
pub const DEFAULT_APP_PORT: u16 = 5000;

#[derive(Debug, Parser)]
#[command(name = "prdeploy")]
#[command(about = "Deploy a PR branch as a container on a free port, locally or over SSH.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Deploy(DeployArgs),
    Teardown(TeardownArgs),
    Doctor(DoctorArgs),
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Branch to deploy.
    #[arg(default_value = DEFAULT_BRANCH)]
    pub branch: String,
    /// PR number namespacing the working directory and container.
    #[arg(default_value_t = DEFAULT_PR_NUMBER)]
    pub pr_number: u32,
    /// Repository name used for container/image naming.
    #[arg(default_value = DEFAULT_REPO_NAME)]
    pub repo_name: String,
    /// Clone URL (or local path) of the repository under test.
    #[arg(long = "repo-url", env = "REPO_URL")]
    pub repo_url: String,
    #[arg(long = "remote-user", env = "REMOTE_USER")]
    pub remote_user: Option<String>,
    #[arg(long = "remote-host", env = "REMOTE_HOST")]
    pub remote_host: Option<String>,
    /// SSH private key for remote mode.
    #[arg(long, env = "SSH_KEY_PATH")]
    pub identity: Option<PathBuf>,
    /// Port the application listens on inside the container.
    #[arg(long = "app-port", default_value_t = DEFAULT_APP_PORT)]
    pub app_port: u16,
    /// Override the Dockerfile template location.
    #[arg(long)]
    pub dockerfile: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct TeardownArgs {
    #[arg(default_value_t = DEFAULT_PR_NUMBER)]
    pub pr_number: u32,
    #[arg(default_value = DEFAULT_REPO_NAME)]
    pub repo_name: String,
    #[arg(long = "remote-user", env = "REMOTE_USER")]
    pub remote_user: Option<String>,
    #[arg(long = "remote-host", env = "REMOTE_HOST")]
    pub remote_host: Option<String>,
    #[arg(long, env = "SSH_KEY_PATH")]
    pub identity: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct DoctorArgs {
    /// Dockerfile template location to check.
    #[arg(long)]
    pub dockerfile: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
}
