use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::deploy;
use crate::executor::Executor;
use crate::logging::DeployLog;

/// What failure cleanup needs to undo: the container/image pair and the
/// working directory for this PR, plus where the commands should run.
pub struct CleanupPlan {
    pub exec: Arc<dyn Executor>,
    pub container: String,
    pub image: String,
    pub workdir: String,
    pub log: DeployLog,
}

/// At-most-once failure cleanup, shared between the error path and the
/// Ctrl+C handler. Armed once deploy artifacts may exist, disarmed when the
/// deployment succeeds so the running container is left alone.
#[derive(Default)]
pub struct CleanupGuard {
    fired: AtomicBool,
    plan: Mutex<Option<CleanupPlan>>,
}

impl CleanupGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn arm(&self, plan: CleanupPlan) {
        if let Ok(mut slot) = self.plan.lock() {
            *slot = Some(plan);
        }
    }

    pub fn disarm(&self) {
        if let Ok(mut slot) = self.plan.lock() {
            *slot = None;
        }
    }

    /// Runs the teardown at most once per invocation; a no-op when the guard
    /// was never armed or was disarmed after success.
    pub fn fire(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let plan = match self.plan.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(plan) = plan {
            let _ = plan.log.event("cleaning up failed deployment");
            deploy::teardown(
                plan.exec.as_ref(),
                &plan.container,
                &plan.image,
                &plan.workdir,
                &plan.log,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_without_arming_is_a_noop() {
        let guard = CleanupGuard::new();
        guard.fire();
        guard.fire();
        assert!(guard.fired.load(Ordering::SeqCst));
    }

    #[test]
    fn disarm_drops_the_plan() {
        let guard = CleanupGuard::new();
        guard.disarm();
        assert!(guard.plan.lock().unwrap().is_none());
    }
}
