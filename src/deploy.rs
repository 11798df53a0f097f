use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::executor::{Executor, argv};
use crate::guard::{CleanupGuard, CleanupPlan};
use crate::logging::DeployLog;
use crate::models::{DeployOutcome, DeployRequest, FatalError};
use crate::runtime::{
    PORT_SCAN_START, container_name, fake_docker_mode, image_tag, now_iso, parse_bound_ports,
    select_port, workdir_rel,
};

pub fn check_tool_exists(exec: &dyn Executor, tool: &str) -> Result<()> {
    let out = exec.run(&argv(&[
        "sh",
        "-lc",
        &format!("command -v {tool} >/dev/null 2>&1"),
    ]))?;
    if out.code == 0 {
        Ok(())
    } else {
        anyhow::bail!("required tool not found in PATH: {tool}")
    }
}

pub fn ensure_docker_daemon(exec: &dyn Executor) -> Result<()> {
    let out = exec.run(&argv(&["docker", "info"]))?;
    if out.code == 0 {
        return Ok(());
    }
    let detail = if !out.stderr.trim().is_empty() {
        out.stderr.trim().to_string()
    } else {
        out.stdout.trim().to_string()
    };
    Err(FatalError::DaemonUnreachable(detail).into())
}

fn preflight(exec: &dyn Executor) -> Result<()> {
    check_tool_exists(exec, "git")?;
    if !fake_docker_mode() {
        check_tool_exists(exec, "docker")?;
    }
    ensure_docker_daemon(exec)?;
    Ok(())
}

/// Best-effort removal of a prior deployment for the same PR number. Absence
/// is the expected steady state before the first deploy, so failures here are
/// swallowed rather than surfaced.
pub fn teardown(
    exec: &dyn Executor,
    container: &str,
    image: &str,
    workdir: &str,
    log: &DeployLog,
) {
    let _ = exec.run(&argv(&["docker", "stop", container]));
    let _ = exec.run(&argv(&["docker", "rm", "-f", container]));
    let _ = exec.run(&argv(&["docker", "rmi", "-f", image]));
    let _ = exec.remove_path(workdir);
    let _ = log.event(&format!(
        "tore down container {container}, image {image} and workdir {workdir}"
    ));
}

fn fetch_source(exec: &dyn Executor, req: &DeployRequest, workdir: &str, log: &DeployLog) -> Result<()> {
    let dest = exec.resolve(workdir);
    exec.run_checked(&argv(&["git", "clone", &req.repo_url, &dest]))?;
    exec.run_checked(&argv(&["git", "-C", &dest, "checkout", &req.branch]))?;
    exec.run_checked(&argv(&["git", "-C", &dest, "pull", "origin", &req.branch]))?;
    log.event(&format!("cloned {} at branch {}", req.repo_url, req.branch))?;
    Ok(())
}

/// The build recipe lives at a fixed location on the invoking host, not
/// inside the repository under test; it is staged into the working tree for
/// every deploy (shipped over scp in remote mode).
fn stage_dockerfile(
    exec: &dyn Executor,
    template: &Path,
    workdir: &str,
    log: &DeployLog,
) -> Result<()> {
    if !template.exists() {
        let err = FatalError::TemplateMissing(template.display().to_string());
        log.event(&err.to_string())?;
        return Err(err.into());
    }
    let dest = format!("{workdir}/Dockerfile");
    if let Err(copy_err) = exec.send_file(template, &dest) {
        let err = FatalError::TemplateCopy(dest, copy_err.to_string());
        log.event(&err.to_string())?;
        return Err(err.into());
    }
    log.event("Dockerfile staged into working directory")?;
    Ok(())
}

fn pick_host_port(exec: &dyn Executor, log: &DeployLog) -> Result<u16> {
    let out = exec.run_checked(&argv(&["docker", "ps", "--format", "{{.Ports}}"]))?;
    let bound = parse_bound_ports(&out.stdout);
    let port = select_port(PORT_SCAN_START, &bound)?;
    log.event(&format!("selected host port {port}"))?;
    Ok(port)
}

fn build_and_run(
    exec: &dyn Executor,
    req: &DeployRequest,
    workdir: &str,
    container: &str,
    image: &str,
    host_port: u16,
    log: &DeployLog,
) -> Result<()> {
    exec.run_checked(&argv(&["docker", "build", "-t", image, &exec.resolve(workdir)]))?;
    exec.run_checked(&argv(&[
        "docker",
        "run",
        "-d",
        "--name",
        container,
        "-p",
        &format!("{host_port}:{}", req.app_port),
        image,
    ]))?;
    log.event(&format!(
        "deployment complete: {container} listening on port {host_port}"
    ))?;
    Ok(())
}

/// One linear deploy: preflight, clear stale state for this PR, fetch the
/// branch tip, stage the build recipe, pick a free port, build, run. The
/// container is left running on success; the guard tears everything down if
/// the run fails or is interrupted after the working directory exists.
pub fn deploy(
    exec: &Arc<dyn Executor>,
    req: &DeployRequest,
    template: &Path,
    log: &DeployLog,
    guard: &CleanupGuard,
) -> Result<DeployOutcome> {
    let container = container_name(&req.repo_name, req.pr_number);
    let image = image_tag(&req.repo_name, req.pr_number);
    let workdir = workdir_rel(&req.repo_name, req.pr_number);

    preflight(exec.as_ref())?;
    log.event(&format!(
        "deploying {} PR #{} (branch {}) via {}",
        req.repo_name,
        req.pr_number,
        req.branch,
        exec.label()
    ))?;

    // Idempotent setup: a second deploy for the same PR never inherits the
    // first one's source tree, container or image.
    if exec.path_exists(&workdir).unwrap_or(false) {
        log.event(&format!(
            "removing stale working directory {}",
            exec.resolve(&workdir)
        ))?;
    }
    teardown(exec.as_ref(), &container, &image, &workdir, log);
    exec.make_dir("work")?;

    guard.arm(CleanupPlan {
        exec: exec.clone(),
        container: container.clone(),
        image: image.clone(),
        workdir: workdir.clone(),
        log: log.clone(),
    });

    fetch_source(exec.as_ref(), req, &workdir, log)?;
    stage_dockerfile(exec.as_ref(), template, &workdir, log)?;
    let host_port = pick_host_port(exec.as_ref(), log)?;
    build_and_run(exec.as_ref(), req, &workdir, &container, &image, host_port, log)?;

    guard.disarm();
    Ok(DeployOutcome {
        container_name: container,
        image_tag: image,
        host_port,
        app_port: req.app_port,
        workdir: exec.resolve(&workdir),
        log_path: log.path().to_string_lossy().to_string(),
        mode: exec.label(),
        deployed_at: now_iso(),
    })
}
