use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Per-invocation plaintext log. Every event line carries a human-readable
/// UTC timestamp and is mirrored to stdout. Cloneable so the interrupt
/// handler can keep writing to the same file.
#[derive(Clone)]
pub struct DeployLog {
    path: Arc<PathBuf>,
    file: Arc<Mutex<File>>,
}

impl DeployLog {
    pub fn create(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log {}", path.display()))?;
        Ok(Self {
            path: Arc::new(path),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn event(&self, message: &str) -> Result<()> {
        let line = format!("[{}] {message}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
        println!("{line}");
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("log file lock poisoned"))?;
        writeln!(file, "{line}").context("failed to append to deploy log")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn events_are_timestamped_and_appended_in_order() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("logs").join("deploy.log");
        let log = DeployLog::create(path.clone()).expect("create log");
        log.event("first").expect("write");
        log.event("second").expect("write");

        let text = std::fs::read_to_string(&path).expect("read log");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("second"));
    }

    #[test]
    fn clones_share_the_same_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("deploy.log");
        let log = DeployLog::create(path.clone()).expect("create log");
        let clone = log.clone();
        log.event("from original").expect("write");
        clone.event("from clone").expect("write");

        let text = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(text.lines().count(), 2);
    }
}
