use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Mutation, Records, Snapshot, StoreBackend, StoreError};

/// Volatile backend. Clones share the same records, so a clone outlives a
/// dropped store the way a database file would.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    records: Arc<Mutex<Records>>,
    switch: FailureSwitch,
}

/// Makes a [`MemoryBackend`] refuse commits, and counts the ones it accepted.
#[derive(Debug, Clone, Default)]
pub struct FailureSwitch {
    fail_commits: Arc<AtomicBool>,
    commits: Arc<AtomicUsize>,
}

impl FailureSwitch {
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_switch(&self) -> FailureSwitch {
        self.switch.clone()
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&mut self) -> Result<Snapshot, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|_| StoreError::backend("memory backend lock poisoned"))?;
        Ok(records.to_snapshot())
    }

    fn commit(&mut self, batch: &[Mutation]) -> Result<(), StoreError> {
        if self.switch.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::backend("simulated commit failure"));
        }

        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::backend("memory backend lock poisoned"))?;
        let mut next = records.clone();
        for mutation in batch {
            next.apply(mutation)?;
        }
        *records = next;
        self.switch.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
