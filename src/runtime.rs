use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::FatalError;

pub const STATE_DIR_ENV: &str = "PRDEPLOY_STATE_DIR";
pub const FAKE_DOCKER_ENV: &str = "PRDEPLOY_TEST_FAKE_DOCKER";
pub const FAKE_BOUND_PORTS_ENV: &str = "PRDEPLOY_TEST_BOUND_PORTS";

/// Host ports are probed linearly starting here; first unbound port wins.
pub const PORT_SCAN_START: u16 = 5000;
pub const PORT_SCAN_END: u16 = 65535;

/// Working-tree layout on the remote host, relative to the login home.
pub const REMOTE_STATE_DIR: &str = ".prdeploy";

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn state_dir() -> PathBuf {
    std::env::var(STATE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".prdeploy"))
}

pub fn logs_dir() -> PathBuf {
    state_dir().join("logs")
}

pub fn template_path() -> PathBuf {
    state_dir().join("templates").join("Dockerfile")
}

pub fn fake_docker_mode() -> bool {
    std::env::var(FAKE_DOCKER_ENV).ok().as_deref() == Some("1")
}

pub fn mkdirp(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
}

pub fn sanitize_name(name: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_.-]+").expect("valid regex");
    re.replace_all(name, "-").to_string()
}

/// Container name for one PR deployment, e.g. `flask-example-pr-1`.
pub fn container_name(repo_name: &str, pr_number: u32) -> String {
    sanitize_name(&format!("{repo_name}-pr-{pr_number}"))
}

/// Image tags must be lowercase even where container names need not be.
pub fn image_tag(repo_name: &str, pr_number: u32) -> String {
    container_name(repo_name, pr_number).to_lowercase()
}

/// State-root-relative working directory for one PR deployment.
pub fn workdir_rel(repo_name: &str, pr_number: u32) -> String {
    format!("work/{}", container_name(repo_name, pr_number))
}

pub fn deploy_stamp() -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let mut rng = rand::rng();
    let mut suffix = String::new();
    for _ in 0..6 {
        suffix.push_str(&format!("{:x}", rng.random_range(0..16)));
    }
    format!("{stamp}-{suffix}")
}

/// Extract host ports from `docker ps --format {{.Ports}}` output. Lines look
/// like `0.0.0.0:5000->5000/tcp, :::5000->5000/tcp`; only the host side of
/// each mapping is of interest.
pub fn parse_bound_ports(ps_output: &str) -> BTreeSet<u16> {
    let re = Regex::new(r":(\d+)->").expect("valid regex");
    let mut bound = BTreeSet::new();
    for cap in re.captures_iter(ps_output) {
        if let Ok(port) = cap[1].parse::<u16>() {
            bound.insert(port);
        }
    }
    bound
}

/// Linear probe from `start` upward; first port with no existing binding is
/// selected. Not atomic against a concurrent invocation, which is acceptable
/// under the single-invocation-at-a-time usage this tool assumes.
pub fn select_port(start: u16, bound: &BTreeSet<u16>) -> Result<u16> {
    let mut candidate = start;
    loop {
        if !bound.contains(&candidate) {
            return Ok(candidate);
        }
        if candidate == PORT_SCAN_END {
            return Err(FatalError::PortRangeExhausted(start, PORT_SCAN_END).into());
        }
        candidate += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_matches_pr_convention() {
        assert_eq!(container_name("flask-example", 1), "flask-example-pr-1");
    }

    #[test]
    fn container_name_sanitizes_odd_characters() {
        assert_eq!(container_name("my repo!", 7), "my-repo--pr-7");
    }

    #[test]
    fn image_tag_is_lowercased() {
        assert_eq!(image_tag("Flask-Example", 3), "flask-example-pr-3");
    }

    #[test]
    fn parse_bound_ports_reads_docker_ps_lines() {
        let out = "0.0.0.0:5000->5000/tcp, :::5000->5000/tcp\n\
                   0.0.0.0:8080->80/tcp\n\
                   \n";
        let bound = parse_bound_ports(out);
        assert!(bound.contains(&5000));
        assert!(bound.contains(&8080));
        assert!(!bound.contains(&80));
        assert_eq!(bound.len(), 2);
    }

    #[test]
    fn select_port_skips_bound_ports() {
        let bound: BTreeSet<u16> = [5000, 5001].into_iter().collect();
        let port = select_port(PORT_SCAN_START, &bound).expect("free port");
        assert_eq!(port, 5002);
    }

    #[test]
    fn select_port_takes_start_when_nothing_bound() {
        let port = select_port(PORT_SCAN_START, &BTreeSet::new()).expect("free port");
        assert_eq!(port, PORT_SCAN_START);
    }

    #[test]
    fn select_port_fails_when_range_exhausted() {
        let bound: BTreeSet<u16> = (65530..=65535).collect();
        let err = select_port(65530, &bound).expect_err("expected exhaustion");
        assert!(err.to_string().contains("no free host port"));
    }
}
