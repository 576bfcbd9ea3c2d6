//! Document store configuration.

use chrono::Duration;

/// What an apply does when it detects side changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Any conflict aborts the whole apply; nothing is written.
    #[default]
    FailAll,
    /// Conflicting documents are left unwritten and reported; the rest of
    /// the working set commits.
    SkipConflicting,
}

/// Configuration for a document store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether an edited document is written (and its version bumped) even
    /// if none of its values changed.
    pub write_if_not_changed: bool,

    /// Handling of side changes detected at commit.
    pub conflict_policy: ConflictPolicy,

    /// Whether history records are written.
    pub track_history: bool,

    /// Whether the working set and apply consult the long lock registry.
    pub check_long_locks: bool,

    /// How long idempotency records are kept. `None` keeps them forever.
    pub request_retention: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            write_if_not_changed: false,
            conflict_policy: ConflictPolicy::FailAll,
            track_history: true,
            check_long_locks: true,
            request_retention: Some(Duration::days(7)),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether unchanged edits are written.
    #[must_use]
    pub const fn write_if_not_changed(mut self, value: bool) -> Self {
        self.write_if_not_changed = value;
        self
    }

    /// Sets the conflict policy.
    #[must_use]
    pub const fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets whether history records are written.
    #[must_use]
    pub const fn track_history(mut self, value: bool) -> Self {
        self.track_history = value;
        self
    }

    /// Sets whether long locks are checked.
    #[must_use]
    pub const fn check_long_locks(mut self, value: bool) -> Self {
        self.check_long_locks = value;
        self
    }

    /// Sets how long idempotency records are kept.
    #[must_use]
    pub fn request_retention(mut self, retention: Option<Duration>) -> Self {
        self.request_retention = retention;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(!config.write_if_not_changed);
        assert_eq!(config.conflict_policy, ConflictPolicy::FailAll);
        assert!(config.track_history);
        assert!(config.check_long_locks);
        assert_eq!(config.request_retention, Some(Duration::days(7)));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .write_if_not_changed(true)
            .conflict_policy(ConflictPolicy::SkipConflicting)
            .track_history(false)
            .request_retention(None);

        assert!(config.write_if_not_changed);
        assert_eq!(config.conflict_policy, ConflictPolicy::SkipConflicting);
        assert!(!config.track_history);
        assert!(config.request_retention.is_none());
    }
}
