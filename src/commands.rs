use anyhow::{Result, bail};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::{Commands, DeployArgs, DoctorArgs, TeardownArgs};
use crate::deploy::{self, check_tool_exists, ensure_docker_daemon};
use crate::executor::{Executor, LocalExec, SshExec};
use crate::guard::CleanupGuard;
use crate::logging::DeployLog;
use crate::models::{DeployRequest, RemoteTarget};
use crate::runtime::{
    container_name, deploy_stamp, fake_docker_mode, image_tag, logs_dir, mkdirp, state_dir,
    template_path, workdir_rel,
};

pub fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Deploy(args) => cmd_deploy(&args),
        Commands::Teardown(args) => cmd_teardown(&args),
        Commands::Doctor(args) => cmd_doctor(&args),
    }
}

fn remote_target(
    user: Option<&String>,
    host: Option<&String>,
    identity: Option<&PathBuf>,
) -> Result<Option<RemoteTarget>> {
    match (user, host) {
        (Some(user), Some(host)) => Ok(Some(RemoteTarget {
            user: user.clone(),
            host: host.clone(),
            key_path: identity.cloned(),
        })),
        (None, None) => Ok(None),
        _ => bail!("--remote-user and --remote-host must be provided together"),
    }
}

fn make_executor(remote: Option<&RemoteTarget>) -> Arc<dyn Executor> {
    match remote {
        Some(target) => Arc::new(SshExec::new(target.clone())),
        None => Arc::new(LocalExec::new()),
    }
}

fn open_log(prefix: &str, repo_name: &str, pr_number: u32) -> Result<DeployLog> {
    let name = format!(
        "{prefix}-{}-{}.log",
        container_name(repo_name, pr_number),
        deploy_stamp()
    );
    DeployLog::create(logs_dir().join(name))
}

fn cmd_deploy(args: &DeployArgs) -> Result<()> {
    let remote = remote_target(
        args.remote_user.as_ref(),
        args.remote_host.as_ref(),
        args.identity.as_ref(),
    )?;
    let req = DeployRequest {
        branch: args.branch.clone(),
        pr_number: args.pr_number,
        repo_name: args.repo_name.clone(),
        repo_url: args.repo_url.clone(),
        app_port: args.app_port,
        remote,
    };
    let exec = make_executor(req.remote.as_ref());
    let log = open_log("deploy", &req.repo_name, req.pr_number)?;
    let template = args.dockerfile.clone().unwrap_or_else(template_path);

    let guard = CleanupGuard::new();
    let handler_guard = guard.clone();
    ctrlc::set_handler(move || {
        handler_guard.fire();
        std::process::exit(130);
    })?;

    match deploy::deploy(&exec, &req, &template, &log, &guard) {
        Ok(outcome) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!(
                    "Deployed {} on port {} ({})",
                    outcome.container_name, outcome.host_port, outcome.mode
                );
                println!("Log: {}", outcome.log_path);
            }
            Ok(())
        }
        Err(err) => {
            let _ = log.event(&format!("deployment failed: {err}"));
            guard.fire();
            Err(err)
        }
    }
}

fn cmd_teardown(args: &TeardownArgs) -> Result<()> {
    let remote = remote_target(
        args.remote_user.as_ref(),
        args.remote_host.as_ref(),
        args.identity.as_ref(),
    )?;
    let exec = make_executor(remote.as_ref());
    let log = open_log("teardown", &args.repo_name, args.pr_number)?;

    let container = container_name(&args.repo_name, args.pr_number);
    let image = image_tag(&args.repo_name, args.pr_number);
    let workdir = workdir_rel(&args.repo_name, args.pr_number);
    deploy::teardown(exec.as_ref(), &container, &image, &workdir, &log);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "container_name": container,
                "image_tag": image,
                "workdir": exec.resolve(&workdir),
                "mode": exec.label(),
            }))?
        );
    } else {
        println!("Teardown complete for {container} ({})", exec.label());
    }
    Ok(())
}

struct DoctorCheck {
    name: String,
    ok: bool,
    detail: String,
    fix: String,
}

fn check(name: &str, result: Result<String>, fix: &str) -> DoctorCheck {
    match result {
        Ok(detail) => DoctorCheck {
            name: name.to_string(),
            ok: true,
            detail,
            fix: String::new(),
        },
        Err(err) => DoctorCheck {
            name: name.to_string(),
            ok: false,
            detail: err.to_string(),
            fix: fix.to_string(),
        },
    }
}

fn check_state_dir_writable() -> Result<String> {
    let dir = state_dir();
    mkdirp(&dir)?;
    let probe = dir.join(".write-probe");
    fs::write(&probe, b"ok")?;
    fs::remove_file(&probe)?;
    Ok(format!("{} is writable", dir.display()))
}

/// Preflight reported to the caller, instead of mutating group membership or
/// any other global state to make docker usable.
fn cmd_doctor(args: &DoctorArgs) -> Result<()> {
    let exec = LocalExec::new();
    let template = args.dockerfile.clone().unwrap_or_else(template_path);

    let checks = vec![
        check(
            "git",
            check_tool_exists(&exec, "git").map(|()| "found in PATH".to_string()),
            "Install git and ensure it is on PATH.",
        ),
        check(
            "docker",
            if fake_docker_mode() {
                Ok("fake docker mode enabled".to_string())
            } else {
                check_tool_exists(&exec, "docker").map(|()| "found in PATH".to_string())
            },
            "Install Docker Engine and ensure docker is on PATH.",
        ),
        check(
            "docker-daemon",
            ensure_docker_daemon(&exec).map(|()| {
                if fake_docker_mode() {
                    "fake docker mode enabled".to_string()
                } else {
                    "docker daemon reachable".to_string()
                }
            }),
            "Start the Docker daemon, or add your user to the docker group and re-login.",
        ),
        check(
            "state-dir",
            check_state_dir_writable(),
            "Ensure the state directory is writable.",
        ),
        check(
            "dockerfile-template",
            if template.exists() {
                Ok(format!("{} present", template.display()))
            } else {
                Err(anyhow::anyhow!("not found at {}", template.display()))
            },
            "Place the Dockerfile template at the expected location or pass --dockerfile.",
        ),
    ];

    let failed = checks.iter().filter(|c| !c.ok).count();

    if args.json {
        let payload = json!({
            "ok": failed == 0,
            "checks": checks
                .iter()
                .map(|c| json!({
                    "name": c.name,
                    "ok": c.ok,
                    "detail": c.detail,
                    "fix": c.fix,
                }))
                .collect::<Vec<_>>()
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("prdeploy doctor");
        for c in &checks {
            println!(
                "- {:<20} {:<4} {}",
                c.name,
                if c.ok { "ok" } else { "fail" },
                c.detail
            );
            if !c.ok {
                println!("  fix: {}", c.fix);
            }
        }
    }

    if failed > 0 {
        bail!("doctor found {failed} failing check(s)");
    }
    Ok(())
}
