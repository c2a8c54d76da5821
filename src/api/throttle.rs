use std::time::{Duration, Instant};

use crate::tree_utils::model::TreeSnapshot;

/// Rate limit for snapshot pushes.
///
/// A snapshot arriving sooner than `min_interval` after the last released one is
/// parked and released by a later [`SnapshotThrottle::poll`]. A newer arrival
/// replaces the parked one, so bursts coalesce into their latest state instead
/// of being dropped.
#[derive(Clone, Debug)]
pub struct SnapshotThrottle {
    min_interval: Duration,
    last_release: Option<Instant>,
    pending: Option<TreeSnapshot>,
}

impl SnapshotThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_release: None, pending: None }
    }

    pub fn offer(&mut self, snapshot: TreeSnapshot, now: Instant) -> Option<TreeSnapshot> {
        if self.ready(now) {
            self.pending = None;
            self.last_release = Some(now);
            return Some(snapshot);
        }
        if self.pending.replace(snapshot).is_some() {
            log::debug!("coalesced a deferred snapshot");
        }
        None
    }

    pub fn poll(&mut self, now: Instant) -> Option<TreeSnapshot> {
        if self.pending.is_none() || !self.ready(now) {
            return None;
        }
        self.last_release = Some(now);
        self.pending.take()
    }

    pub fn has_pending(&self) -> bool { self.pending.is_some() }

    /// When the parked snapshot becomes releasable.
    pub fn next_release(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        Some(self.last_release.map_or_else(Instant::now, |t| t + self.min_interval))
    }

    fn ready(&self, now: Instant) -> bool {
        match self.last_release {
            None => true,
            Some(t) => now.saturating_duration_since(t) >= self.min_interval,
        }
    }
}
