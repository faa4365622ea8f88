//! Catch-up tracking.
//!
//! While a sync is in flight the node does not vote: INIT and SIGN
//! ballots are ignored at the pipeline's sync check, and ACCEPT ballots
//! only feed the peer-height map. The runner performs the actual block
//! fetching and feeds applied blocks back as events.

#[derive(Debug, Default)]
pub struct SyncState {
    target: Option<u64>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_syncing(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<u64> {
        self.target
    }

    /// Record a new sync target. A target at or below an in-flight one is
    /// ignored.
    pub fn begin(&mut self, target: u64) -> bool {
        if self.target.is_some_and(|t| t >= target) {
            return false;
        }
        self.target = Some(target);
        true
    }

    /// Sync finished or was abandoned.
    pub fn complete(&mut self) {
        self.target = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_ignores_lower_targets() {
        let mut sync = SyncState::new();
        assert!(sync.begin(9));
        assert!(!sync.begin(7));
        assert!(!sync.begin(9));
        assert!(sync.begin(12));
        assert_eq!(sync.target(), Some(12));
        sync.complete();
        assert!(!sync.is_syncing());
    }
}
