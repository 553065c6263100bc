//! Process-wide run lock
//!
//! Recording, on-demand playback and scheduled playback each hold the lock
//! for their whole session. The guard releases it on drop, so every exit
//! path (success, failure, cancellation, panic unwinding) frees it.

use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{ReplayError, ReplayResult};

#[derive(Clone, Default)]
pub struct RunLock {
    inner: Arc<AsyncMutex<()>>,
    holder: Arc<Mutex<Option<String>>>,
}

/// Proof that the run lock is held
pub struct RunGuard {
    _guard: OwnedMutexGuard<()>,
    holder: Arc<Mutex<Option<String>>>,
    label: String,
}

impl RunGuard {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.holder.lock() {
            *holder = None;
        }
        log::debug!("Run lock released by {}", self.label);
    }
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock if free, else report who holds it
    pub fn try_acquire(&self, label: &str) -> ReplayResult<RunGuard> {
        match self.inner.clone().try_lock_owned() {
            Ok(guard) => Ok(self.wrap(guard, label)),
            Err(_) => Err(ReplayError::ScheduleOverlap {
                holder: self.holder().unwrap_or_else(|| "unknown".to_string()),
            }),
        }
    }

    /// Wait for the lock
    pub async fn acquire(&self, label: &str) -> RunGuard {
        if let Some(holder) = self.holder() {
            log::info!("{} waiting for run lock held by {}", label, holder);
        }
        let guard = self.inner.clone().lock_owned().await;
        self.wrap(guard, label)
    }

    pub fn holder(&self) -> Option<String> {
        self.holder.lock().ok().and_then(|h| h.clone())
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    fn wrap(&self, guard: OwnedMutexGuard<()>, label: &str) -> RunGuard {
        if let Ok(mut holder) = self.holder.lock() {
            *holder = Some(label.to_string());
        }
        log::debug!("Run lock acquired by {}", label);
        RunGuard {
            _guard: guard,
            holder: self.holder.clone(),
            label: label.to_string(),
        }
    }
}
