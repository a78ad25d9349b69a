//! Notification gate: decides whether a classified message is worth a ping.
//!
//! Precedence:
//! 1. Newsletter / Promotional (and any extra muted category) never notify.
//! 2. High priority notifies.
//! 3. Needs-response notifies.
//! 4. Everything else stays quiet.
//!
//! Pure: no backend, no I/O.

use serde::{Deserialize, Serialize};

use crate::pipeline::types::{Category, ClassificationRecord, NotificationDecision, Priority};

/// Categories that are muted under every policy.
pub const ALWAYS_MUTED: [Category; 2] = [Category::Newsletter, Category::Promotional];

/// Overridable parts of the gating policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPolicy {
    pub notify_on_high_priority: bool,
    pub notify_on_needs_response: bool,
    /// Muted in addition to [`ALWAYS_MUTED`].
    pub extra_muted_categories: Vec<Category>,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

impl NotificationPolicy {
    pub fn strict() -> Self {
        Self {
            notify_on_high_priority: true,
            notify_on_needs_response: true,
            extra_muted_categories: Vec::new(),
        }
    }

    pub fn is_muted(&self, category: Category) -> bool {
        ALWAYS_MUTED.contains(&category) || self.extra_muted_categories.contains(&category)
    }
}

/// Gate applying a [`NotificationPolicy`].
#[derive(Debug, Clone, Default)]
pub struct NotificationGate {
    policy: NotificationPolicy,
}

impl NotificationGate {
    pub fn new(policy: NotificationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &NotificationPolicy {
        &self.policy
    }

    pub fn decide(&self, record: &ClassificationRecord, from: &str, subject: &str) -> NotificationDecision {
        if self.should_notify(record) {
            NotificationDecision::notify(render_alert(record, from, subject))
        } else {
            NotificationDecision::skip()
        }
    }

    fn should_notify(&self, record: &ClassificationRecord) -> bool {
        if self.policy.is_muted(record.category) {
            return false;
        }
        if self.policy.notify_on_high_priority && record.priority == Priority::High {
            return true;
        }
        self.policy.notify_on_needs_response && record.needs_response
    }
}

/// Decide with the strict default policy.
pub fn decide(record: &ClassificationRecord, from: &str, subject: &str) -> NotificationDecision {
    NotificationGate::default().decide(record, from, subject)
}

/// Render the chat alert for a message.
pub fn render_alert(record: &ClassificationRecord, from: &str, subject: &str) -> String {
    format!(
        "From: {}\nSubject: {}\nPriority: {}\nCategory: {}\nNeeds Response: {}\nSummary: {}",
        from,
        subject,
        record.priority,
        record.category,
        if record.needs_response { "Yes" } else { "No" },
        record.summary,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(priority: Priority, category: Category, needs_response: bool) -> ClassificationRecord {
        ClassificationRecord {
            priority,
            category,
            needs_response,
            contains_tasks: false,
            summary: "Test summary".into(),
        }
    }

    #[test]
    fn muted_categories_never_notify() {
        for category in ALWAYS_MUTED {
            for priority in Priority::ALL {
                for needs_response in [true, false] {
                    let decision = decide(&record(priority, category, needs_response), "a", "b");
                    assert!(!decision.should_notify, "{category} {priority} {needs_response}");
                    assert!(decision.rendered_message.is_none());
                }
            }
        }
    }

    #[test]
    fn high_priority_work_notifies() {
        let decision = decide(&record(Priority::High, Category::Work, false), "a", "b");
        assert!(decision.should_notify);
    }

    #[test]
    fn needs_response_notifies_even_when_low() {
        let decision = decide(&record(Priority::Low, Category::Personal, true), "a", "b");
        assert!(decision.should_notify);
    }

    #[test]
    fn low_no_response_stays_quiet() {
        let decision = decide(&record(Priority::Low, Category::Other, false), "a", "b");
        assert!(!decision.should_notify);
        assert!(decision.rendered_message.is_none());
    }

    #[test]
    fn medium_without_response_stays_quiet() {
        let decision = decide(&record(Priority::Medium, Category::Work, false), "a", "b");
        assert!(!decision.should_notify);
    }

    #[test]
    fn rendered_message_has_all_fields() {
        let decision = decide(
            &record(Priority::High, Category::ReceiptsInvoices, true),
            "Bank <alerts@bank.example>",
            "Unusual charge",
        );
        assert_eq!(
            decision.rendered_message.as_deref(),
            Some(
                "From: Bank <alerts@bank.example>\nSubject: Unusual charge\nPriority: High\n\
                 Category: Receipts_Invoices\nNeeds Response: Yes\nSummary: Test summary"
            )
        );
    }

    #[test]
    fn policy_can_disable_needs_response_rule() {
        let gate = NotificationGate::new(NotificationPolicy {
            notify_on_needs_response: false,
            ..NotificationPolicy::strict()
        });
        assert!(!gate.decide(&record(Priority::Low, Category::Personal, true), "a", "b").should_notify);
        assert!(gate.decide(&record(Priority::High, Category::Personal, false), "a", "b").should_notify);
    }

    #[test]
    fn extra_muted_category() {
        let gate = NotificationGate::new(NotificationPolicy {
            extra_muted_categories: vec![Category::GitHub],
            ..NotificationPolicy::strict()
        });
        assert!(!gate.decide(&record(Priority::High, Category::GitHub, true), "a", "b").should_notify);
        assert!(gate.decide(&record(Priority::High, Category::Work, false), "a", "b").should_notify);
    }

    #[test]
    fn always_muted_cannot_be_overridden() {
        let gate = NotificationGate::new(NotificationPolicy {
            notify_on_high_priority: true,
            notify_on_needs_response: true,
            extra_muted_categories: vec![],
        });
        assert!(gate.policy().is_muted(Category::Newsletter));
        assert!(!gate.decide(&record(Priority::High, Category::Promotional, true), "a", "b").should_notify);
    }
}
