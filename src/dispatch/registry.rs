use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::workflow::task::TargetKey;

/// Cooperative cancellation flag shared between a claim and the registry.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Set of target keys with a running workflow.
///
/// The lock is held only for single insert, remove and lookup operations.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    active: Mutex<HashMap<TargetKey, CancelToken>>,
}

impl TaskRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn active(&self) -> MutexGuard<'_, HashMap<TargetKey, CancelToken>> {
        // Critical sections are single map operations, so a poisoned map is
        // still consistent.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomic insert-if-absent. `None` means a workflow already holds the key.
    pub fn try_claim(self: &Arc<Self>, key: TargetKey) -> Option<Claim> {
        let token = CancelToken::default();
        {
            let mut active = self.active();
            if active.contains_key(&key) {
                return None;
            }
            active.insert(key.clone(), token.clone());
        }
        Some(Claim {
            registry: Arc::clone(self),
            key,
            token,
        })
    }

    pub fn is_active(&self, key: &TargetKey) -> bool {
        self.active().contains_key(key)
    }

    pub fn in_flight(&self) -> Vec<TargetKey> {
        self.active().keys().cloned().collect()
    }

    /// Ask the workflow holding `key` to stop at its next state boundary.
    pub fn cancel(&self, key: &TargetKey) -> bool {
        match self.active().get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let active = self.active();
        for token in active.values() {
            token.cancel();
        }
        active.len()
    }

    fn release(&self, key: &TargetKey) {
        self.active().remove(key);
    }
}

/// Exclusive hold on a target key. Dropping it releases the key, whichever way
/// the owning workflow ends.
#[derive(Debug)]
pub struct Claim {
    registry: Arc<TaskRegistry>,
    key: TargetKey,
    token: CancelToken,
}

impl Claim {
    pub fn key(&self) -> &TargetKey {
        &self.key
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.registry.release(&self.key);
        tracing::debug!(key = %self.key, "Released target key");
    }
}
