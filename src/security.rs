//! Mandatory-access-control collaborators and the isolation-level counter.
//!
//! Sandboxes on an SELinux host run under a process label such as
//! `system_u:system_r:container_t:s0:c1,c2`. The trailing MCS level
//! (`s0:c1,c2`) is shared by every process of the pod, and several sandboxes
//! may share a level. [`ProcessLevels`] counts how many tracked sandboxes use
//! each level so it is handed back to the [`LevelPool`] only when the last
//! one goes away.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::error::Result;

/// Reserves and releases full security label strings.
pub trait LabelReserver: Send + Sync {
    /// Marks `label` as in use so it is not handed out again.
    fn reserve_label(&self, label: &str) -> Result<()>;

    /// Returns `label` to the allocator.
    fn release_label(&self, label: &str) -> Result<()>;
}

/// Pool of isolation-level tokens.
pub trait LevelPool: Send + Sync {
    /// Takes `level` out of the pool.
    fn acquire(&self, level: &str) -> Result<()>;

    /// Returns `level` to the pool.
    fn release(&self, level: &str) -> Result<()>;
}

/// Label reserver for hosts without mandatory access control.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLabels;

impl LabelReserver for NoopLabels {
    fn reserve_label(&self, _label: &str) -> Result<()> {
        Ok(())
    }

    fn release_label(&self, _label: &str) -> Result<()> {
        Ok(())
    }
}

/// Level pool for hosts without mandatory access control.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLevelPool;

impl LevelPool for NoopLevelPool {
    fn acquire(&self, _level: &str) -> Result<()> {
        Ok(())
    }

    fn release(&self, _level: &str) -> Result<()> {
        Ok(())
    }
}

/// Extracts the MCS level from an SELinux label.
///
/// `user:role:type:level` yields `level`, which may itself contain `:`.
/// Returns `None` for empty labels and labels without a level.
pub fn label_level(label: &str) -> Option<&str> {
    let mut parts = label.splitn(4, ':');
    let (_user, _role, _type) = (parts.next()?, parts.next()?, parts.next()?);
    parts.next().filter(|level| !level.is_empty())
}

/// Reference counts of isolation levels held by tracked sandboxes.
///
/// The lock here is the only one taken for per-sandbox platform bookkeeping.
/// It is held for the count update and the pool call, never across I/O or
/// namespace work.
#[derive(Debug, Default)]
pub struct ProcessLevels {
    counts: Mutex<HashMap<String, usize>>,
}

impl ProcessLevels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one more sandbox using `level`; the first user acquires it.
    pub fn acquire(&self, level: &str, pool: &dyn LevelPool) -> Result<()> {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.get(level).copied().unwrap_or(0);
        if count == 0 {
            pool.acquire(level)?;
        }
        counts.insert(level.to_string(), count + 1);
        debug!(level, users = count + 1, "Acquired process level");
        Ok(())
    }

    /// Counts one fewer sandbox using `level`; the last user releases it.
    ///
    /// Unknown levels are ignored.
    pub fn release(&self, level: &str, pool: &dyn LevelPool) -> Result<()> {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let Some(count) = counts.get_mut(level) else {
            return Ok(());
        };
        if *count > 1 {
            *count -= 1;
            return Ok(());
        }
        pool.release(level)?;
        counts.remove(level);
        debug!(level, "Released process level");
        Ok(())
    }

    /// Number of sandboxes currently using `level`.
    pub fn count(&self, level: &str) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(level)
            .copied()
            .unwrap_or(0)
    }
}
