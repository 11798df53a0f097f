use anyhow::{Context, Result, bail};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::models::{CmdOutput, RemoteTarget};
use crate::runtime::{FAKE_BOUND_PORTS_ENV, REMOTE_STATE_DIR, fake_docker_mode, state_dir};

/// Where deploy commands run. The deploy pipeline is written once against
/// this trait; local and SSH execution differ only in the implementation.
/// Paths crossing the trait are state-root-relative so both sides share the
/// same layout.
pub trait Executor: Send + Sync {
    fn label(&self) -> String;
    fn run(&self, argv: &[String]) -> Result<CmdOutput>;
    fn path_exists(&self, rel: &str) -> Result<bool>;
    fn make_dir(&self, rel: &str) -> Result<()>;
    fn remove_path(&self, rel: &str) -> Result<()>;
    fn send_file(&self, local: &Path, rel_dest: &str) -> Result<()>;
    /// Path string usable inside an argv on the execution side.
    fn resolve(&self, rel: &str) -> String;

    fn run_checked(&self, argv: &[String]) -> Result<CmdOutput> {
        let out = self.run(argv)?;
        if out.code != 0 {
            bail!(
                "command failed ({}): {}\nstdout: {}\nstderr: {}",
                out.code,
                argv.join(" "),
                out.stdout.trim(),
                out.stderr.trim()
            );
        }
        Ok(out)
    }
}

pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

fn local_output(cmd: &[String]) -> Result<CmdOutput> {
    if cmd.is_empty() {
        bail!("empty command");
    }
    let output = Command::new(&cmd[0])
        .args(&cmd[1..])
        .output()
        .with_context(|| format!("failed to run command: {}", cmd.join(" ")))?;
    Ok(CmdOutput {
        code: output.status.code().unwrap_or(1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Test harness: docker invocations are journaled and answered with canned
/// output instead of reaching a real daemon.
fn fake_docker(cmd: &[String]) -> Result<CmdOutput> {
    let journal = state_dir().join("fake-docker.log");
    if let Some(parent) = journal.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(&journal)?;
    writeln!(file, "{}", cmd.join(" "))?;

    let stdout = match cmd.get(1).map(String::as_str) {
        Some("ps") => fake_ps_output(),
        Some("run") => "0f0f0f0f0f0f\n".to_string(),
        _ => String::new(),
    };
    Ok(CmdOutput {
        code: 0,
        stdout,
        stderr: String::new(),
    })
}

fn fake_ps_output() -> String {
    let Ok(raw) = std::env::var(FAKE_BOUND_PORTS_ENV) else {
        return String::new();
    };
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("0.0.0.0:{p}->5000/tcp, :::{p}->5000/tcp\n"))
        .collect()
}

fn maybe_fake(cmd: &[String]) -> Option<Result<CmdOutput>> {
    if fake_docker_mode() && cmd.first().map(String::as_str) == Some("docker") {
        return Some(fake_docker(cmd));
    }
    None
}

/// Runs commands as local child processes against the local state directory.
pub struct LocalExec {
    root: PathBuf,
}

impl LocalExec {
    pub fn new() -> Self {
        Self { root: state_dir() }
    }
}

impl Default for LocalExec {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for LocalExec {
    fn label(&self) -> String {
        "local".to_string()
    }

    fn run(&self, cmd: &[String]) -> Result<CmdOutput> {
        if let Some(out) = maybe_fake(cmd) {
            return out;
        }
        local_output(cmd)
    }

    fn path_exists(&self, rel: &str) -> Result<bool> {
        Ok(self.root.join(rel).exists())
    }

    fn make_dir(&self, rel: &str) -> Result<()> {
        let path = self.root.join(rel);
        fs::create_dir_all(&path).with_context(|| format!("failed to create {}", path.display()))
    }

    fn remove_path(&self, rel: &str) -> Result<()> {
        let path = self.root.join(rel);
        if path.is_dir() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        } else if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    fn send_file(&self, local: &Path, rel_dest: &str) -> Result<()> {
        let dest = self.root.join(rel_dest);
        fs::copy(local, &dest).with_context(|| {
            format!("failed to copy {} to {}", local.display(), dest.display())
        })?;
        Ok(())
    }

    fn resolve(&self, rel: &str) -> String {
        self.root.join(rel).to_string_lossy().to_string()
    }
}

/// Runs every command inside a key-authenticated SSH session on the remote
/// host. One logical deploy algorithm, no second code path: the same argv the
/// local executor would spawn is shell-quoted and handed to ssh.
pub struct SshExec {
    target: RemoteTarget,
}

impl SshExec {
    pub fn new(target: RemoteTarget) -> Self {
        Self { target }
    }

    fn ssh_argv(&self, cmd: &[String]) -> Result<Vec<String>> {
        let quoted = shlex::try_join(cmd.iter().map(String::as_str))
            .context("remote command cannot be shell-quoted")?;
        let mut ssh = vec![
            "ssh".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if let Some(key) = &self.target.key_path {
            ssh.push("-i".to_string());
            ssh.push(key.to_string_lossy().to_string());
        }
        ssh.push(self.target.destination());
        ssh.push(quoted);
        Ok(ssh)
    }

    fn scp_argv(&self, local: &Path, rel_dest: &str) -> Vec<String> {
        let mut scp = vec![
            "scp".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if let Some(key) = &self.target.key_path {
            scp.push("-i".to_string());
            scp.push(key.to_string_lossy().to_string());
        }
        scp.push(local.to_string_lossy().to_string());
        scp.push(format!("{}:{}", self.target.destination(), self.resolve(rel_dest)));
        scp
    }
}

impl Executor for SshExec {
    fn label(&self) -> String {
        format!("ssh {}", self.target.destination())
    }

    fn run(&self, cmd: &[String]) -> Result<CmdOutput> {
        if let Some(out) = maybe_fake(cmd) {
            return out;
        }
        local_output(&self.ssh_argv(cmd)?)
    }

    fn path_exists(&self, rel: &str) -> Result<bool> {
        let out = self.run(&argv(&["test", "-e", &self.resolve(rel)]))?;
        Ok(out.code == 0)
    }

    fn make_dir(&self, rel: &str) -> Result<()> {
        self.run_checked(&argv(&["mkdir", "-p", &self.resolve(rel)]))?;
        Ok(())
    }

    fn remove_path(&self, rel: &str) -> Result<()> {
        self.run_checked(&argv(&["rm", "-rf", &self.resolve(rel)]))?;
        Ok(())
    }

    fn send_file(&self, local: &Path, rel_dest: &str) -> Result<()> {
        let out = local_output(&self.scp_argv(local, rel_dest))?;
        if out.code != 0 {
            bail!(
                "scp to {} failed ({}): {}",
                self.target.destination(),
                out.code,
                out.stderr.trim()
            );
        }
        Ok(())
    }

    fn resolve(&self, rel: &str) -> String {
        format!("{REMOTE_STATE_DIR}/{rel}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> RemoteTarget {
        RemoteTarget {
            user: "deploy".to_string(),
            host: "build-02.example.net".to_string(),
            key_path: Some(PathBuf::from("/home/ci/.ssh/id_ed25519")),
        }
    }

    #[test]
    fn ssh_argv_wraps_command_with_key_and_destination() {
        let exec = SshExec::new(target());
        let wrapped = exec
            .ssh_argv(&argv(&["docker", "ps", "--format", "{{.Ports}}"]))
            .expect("ssh argv");
        assert_eq!(wrapped[0], "ssh");
        assert!(wrapped.contains(&"BatchMode=yes".to_string()));
        assert!(wrapped.contains(&"-i".to_string()));
        assert!(wrapped.contains(&"/home/ci/.ssh/id_ed25519".to_string()));
        assert!(wrapped.contains(&"deploy@build-02.example.net".to_string()));
        assert_eq!(wrapped.last().unwrap(), "docker ps --format '{{.Ports}}'");
    }

    #[test]
    fn ssh_argv_omits_identity_when_no_key_given() {
        let exec = SshExec::new(RemoteTarget {
            key_path: None,
            ..target()
        });
        let wrapped = exec.ssh_argv(&argv(&["docker", "info"])).expect("ssh argv");
        assert!(!wrapped.contains(&"-i".to_string()));
    }

    #[test]
    fn scp_argv_targets_remote_state_dir() {
        let exec = SshExec::new(target());
        let scp = exec.scp_argv(
            Path::new("/tmp/Dockerfile"),
            "work/flask-example-pr-1/Dockerfile",
        );
        assert_eq!(scp[0], "scp");
        assert_eq!(
            scp.last().unwrap(),
            "deploy@build-02.example.net:.prdeploy/work/flask-example-pr-1/Dockerfile"
        );
    }

    #[test]
    fn remote_paths_resolve_under_remote_state_dir() {
        let exec = SshExec::new(target());
        assert_eq!(exec.resolve("work/x"), ".prdeploy/work/x");
    }
}
