//! RunSlotManager - bounds how many items execute at once

use std::collections::HashSet;

use tracing::debug;

/// Counted run permits keyed by the identity holding them
#[derive(Debug)]
pub struct RunSlotManager {
    max: usize,
    running: HashSet<String>,
    peak: usize,
}

impl RunSlotManager {
    pub fn new(max: usize) -> Self {
        debug!(max, "RunSlotManager::new: called");
        Self {
            max,
            running: HashSet::new(),
            peak: 0,
        }
    }

    /// Take a slot for `id` without waiting
    ///
    /// Fails when all slots are taken or `id` already holds one.
    pub fn try_acquire(&mut self, id: &str) -> bool {
        if self.running.len() >= self.max || self.running.contains(id) {
            debug!(%id, running = self.running.len(), max = self.max, "RunSlotManager::try_acquire: refused");
            return false;
        }
        self.running.insert(id.to_string());
        self.peak = self.peak.max(self.running.len());
        true
    }

    /// Return the slot held by `id`; a no-op when it holds none
    pub fn release(&mut self, id: &str) -> bool {
        let released = self.running.remove(id);
        if !released {
            debug!(%id, "RunSlotManager::release: no slot held");
        }
        released
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.running.contains(id)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Free slots left
    pub fn available(&self) -> usize {
        self.max.saturating_sub(self.running.len())
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Highest concurrent count observed
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Running ids, sorted
    pub fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.running.iter().cloned().collect();
        ids.sort();
        ids
    }
}
