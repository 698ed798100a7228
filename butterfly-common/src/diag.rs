//! Rate-limited warnings
//!
//! Recoverable problems (truncated tag lists, out-of-order input, ...) can
//! repeat millions of times on a large planet file. A [`Throttle`] lets the
//! first few through to the log and counts the rest.

use log::warn;

/// Number of occurrences reported before a throttle goes quiet
pub const DEFAULT_REPORTS: u32 = 3;

/// Counts occurrences of one warning category and decides which get logged
#[derive(Debug, Clone)]
pub struct Throttle {
    label: &'static str,
    max_reports: u32,
    count: u64,
}

impl Throttle {
    pub fn new(label: &'static str) -> Self {
        Self::with_limit(label, DEFAULT_REPORTS)
    }

    pub fn with_limit(label: &'static str, max_reports: u32) -> Self {
        Self {
            label,
            max_reports,
            count: 0,
        }
    }

    /// Record one occurrence and log it unless the quota is spent.
    pub fn warn(&mut self, message: impl AsRef<str>) {
        self.count += 1;
        if self.count <= u64::from(self.max_reports) {
            warn!("{}: {}", self.label, message.as_ref());
            if self.count == u64::from(self.max_reports) {
                warn!("{}: further warnings suppressed", self.label);
            }
        }
    }

    /// Total occurrences, logged or not
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Number of occurrences that were not logged
    pub fn suppressed(&self) -> u64 {
        self.count.saturating_sub(u64::from(self.max_reports))
    }

    /// Log the suppressed total, if any.
    pub fn summarize(&self) {
        let suppressed = self.suppressed();
        if suppressed > 0 {
            warn!("{}: {suppressed} more occurrences not shown", self.label);
        }
    }
}
