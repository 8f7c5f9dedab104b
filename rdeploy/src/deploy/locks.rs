//! Per-deployment ownership tokens

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Set of deployment ids that currently have a unit of work in flight
#[derive(Debug, Default)]
pub struct DeploymentLocks {
    held: Mutex<HashSet<u64>>,
}

impl DeploymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `deployment_id`, or `None` if someone else holds it
    pub fn try_acquire(self: &Arc<Self>, deployment_id: u64) -> Option<DeploymentGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(deployment_id) {
            return None;
        }
        debug!("Acquired deployment {}", deployment_id);
        Some(DeploymentGuard {
            locks: Arc::clone(self),
            deployment_id,
        })
    }

    pub fn is_held(&self, deployment_id: u64) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.contains(&deployment_id)
    }

    fn release(&self, deployment_id: u64) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&deployment_id);
        debug!("Released deployment {}", deployment_id);
    }
}

/// Ownership of one deployment id; released on drop
#[derive(Debug)]
pub struct DeploymentGuard {
    locks: Arc<DeploymentLocks>,
    deployment_id: u64,
}

impl DeploymentGuard {
    pub fn deployment_id(&self) -> u64 {
        self.deployment_id
    }
}

impl Drop for DeploymentGuard {
    fn drop(&mut self) {
        self.locks.release(self.deployment_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_per_id() {
        let locks = Arc::new(DeploymentLocks::new());
        let guard = locks.try_acquire(1).unwrap();
        assert!(locks.try_acquire(1).is_none());
        assert!(locks.try_acquire(2).is_some());

        drop(guard);
        assert!(!locks.is_held(1));
        assert!(locks.try_acquire(1).is_some());
    }
}
