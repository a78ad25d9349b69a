//! End-of-run statistics.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::pipeline::types::{Category, MessageState, Priority, ProcessedMessage};

/// Aggregate counts for one run, printed when the binary exits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub by_priority: BTreeMap<Priority, usize>,
    pub by_category: BTreeMap<Category, usize>,
    pub needs_response: usize,
    pub no_response: usize,
    pub notified: usize,
    pub fallback_used: usize,
    pub label_failures: usize,
    pub notify_failures: usize,
    pub mark_seen_failures: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_processed<'a>(results: impl IntoIterator<Item = &'a ProcessedMessage>) -> Self {
        let mut summary = Self::new();
        for result in results {
            summary.record(result);
        }
        summary
    }

    /// Fold one processed message into the counts.
    pub fn record(&mut self, result: &ProcessedMessage) {
        self.total += 1;

        if result.state == MessageState::Failed {
            self.failed += 1;
        }

        if let Some(ref record) = result.record {
            *self.by_priority.entry(record.priority).or_default() += 1;
            *self.by_category.entry(record.category).or_default() += 1;
            if record.needs_response {
                self.needs_response += 1;
            } else {
                self.no_response += 1;
            }
        }

        if result
            .classification_source
            .as_ref()
            .is_some_and(|s| s.is_fallback())
        {
            self.fallback_used += 1;
        }

        if result.labels.is_failed() {
            self.label_failures += 1;
        }
        if result.notification.is_failed() {
            self.notify_failures += 1;
        }
        if result.mark_seen.is_failed() {
            self.mark_seen_failures += 1;
        }
        if result.state == MessageState::Done
            && result.decision.as_ref().is_some_and(|d| d.should_notify)
            && !result.notification.is_failed()
        {
            self.notified += 1;
        }
    }

    /// Whether any message ended in `Failed`.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Processed {} message(s)", self.total)?;

        if !self.by_priority.is_empty() {
            writeln!(f, "By priority:")?;
            for (priority, count) in &self.by_priority {
                writeln!(f, "  {priority}: {count}")?;
            }
        }
        if !self.by_category.is_empty() {
            writeln!(f, "By category:")?;
            for (category, count) in &self.by_category {
                writeln!(f, "  {category}: {count}")?;
            }
        }

        writeln!(
            f,
            "Needs response: {} yes / {} no",
            self.needs_response, self.no_response
        )?;
        writeln!(f, "Notifications sent: {}", self.notified)?;
        writeln!(f, "Fallback classifications: {}", self.fallback_used)?;
        writeln!(
            f,
            "Label failures: {}, notify failures: {}, mark-seen failures: {}",
            self.label_failures, self.notify_failures, self.mark_seen_failures
        )?;
        write!(f, "Failed messages: {}", self.failed)
    }
}
