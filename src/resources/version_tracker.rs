/// Version counter used to detect changes without diffing contents.
///
/// Passes, registries and the scene bump their tracker on every mutation
/// that affects rendering; consumers remember the last version they saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTracker {
    version: u64,
}

impl ChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self { version: 0 }
    }

    /// Marks as modified, increments version by 1
    pub fn changed(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Gets the current version number
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns `true` if the version moved past `seen`, and updates `seen`.
    pub fn take_changed(&self, seen: &mut u64) -> bool {
        if *seen == self.version {
            false
        } else {
            *seen = self.version;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_changed_reports_once() {
        let mut tracker = ChangeTracker::new();
        let mut seen = tracker.version();
        assert!(!tracker.take_changed(&mut seen));
        tracker.changed();
        assert!(tracker.take_changed(&mut seen));
        assert!(!tracker.take_changed(&mut seen));
    }
}
