//! Shared types for the triage pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body length cap applied when a message enters the pipeline.
pub const MAX_BODY_CHARS: usize = 1000;

// ── Inbound message ─────────────────────────────────────────────────

/// An unread message as handed over by the mail source.
///
/// Immutable once built. The body is truncated to [`MAX_BODY_CHARS`] so
/// downstream classification never sees unbounded input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Opaque identifier, stable for one processing cycle (IMAP UID).
    pub id: String,
    /// The From header, e.g. `Alice <alice@example.com>`.
    pub sender: String,
    pub subject: String,
    /// The Date header as received.
    pub date: String,
    pub body: String,
}

impl RawMessage {
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        date: impl Into<String>,
        body: &str,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            subject: subject.into(),
            date: date.into(),
            body: truncate_chars(body, MAX_BODY_CHARS).to_string(),
        }
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ── Classification ──────────────────────────────────────────────────

/// How urgent a message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// What kind of message this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Personal,
    Work,
    Promotional,
    Newsletter,
    GitHub,
    YouTube,
    #[serde(rename = "Receipts_Invoices")]
    ReceiptsInvoices,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Personal,
        Category::Work,
        Category::Promotional,
        Category::Newsletter,
        Category::GitHub,
        Category::YouTube,
        Category::ReceiptsInvoices,
        Category::Other,
    ];

    /// Wire name, as used in prompts, labels and notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "Personal",
            Self::Work => "Work",
            Self::Promotional => "Promotional",
            Self::Newsletter => "Newsletter",
            Self::GitHub => "GitHub",
            Self::YouTube => "YouTube",
            Self::ReceiptsInvoices => "Receipts_Invoices",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Case-insensitive; `_`, `/`, `&`, `-` and spaces are ignored so that
    /// `Receipts/Invoices` and `receipts & invoices` both parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "personal" => Ok(Self::Personal),
            "work" => Ok(Self::Work),
            "promotional" | "promotion" | "promotions" => Ok(Self::Promotional),
            "newsletter" | "newsletters" => Ok(Self::Newsletter),
            "github" => Ok(Self::GitHub),
            "youtube" => Ok(Self::YouTube),
            "receiptsinvoices" | "receiptsandinvoices" | "receipts" | "invoices" => {
                Ok(Self::ReceiptsInvoices)
            }
            "other" => Ok(Self::Other),
            _ => Err(format!("unknown category '{}'", s.trim())),
        }
    }
}

/// Stage-one output. Every field always holds a valid value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub priority: Priority,
    pub category: Category,
    pub needs_response: bool,
    pub contains_tasks: bool,
    pub summary: String,
}

impl Default for ClassificationRecord {
    /// What a total classification failure degrades to.
    fn default() -> Self {
        Self {
            priority: Priority::Low,
            category: Category::Other,
            needs_response: false,
            contains_tasks: false,
            summary: String::new(),
        }
    }
}

/// Which path produced a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ClassificationSource {
    Backend { model: String },
    Fallback { reason: String },
}

impl ClassificationSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// A record together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub record: ClassificationRecord,
    pub source: ClassificationSource,
}

// ── Notification ────────────────────────────────────────────────────

/// Gate output. `rendered_message` is present exactly when notifying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationDecision {
    pub should_notify: bool,
    pub rendered_message: Option<String>,
}

impl NotificationDecision {
    pub fn skip() -> Self {
        Self {
            should_notify: false,
            rendered_message: None,
        }
    }

    pub fn notify(message: String) -> Self {
        Self {
            should_notify: true,
            rendered_message: Some(message),
        }
    }
}

// ── Labels ──────────────────────────────────────────────────────────

/// Label applied when a message needs a reply.
pub const NEEDS_RESPONSE_LABEL: &str = "Needs_Response";

/// Derive the labels for a record: `Priority/<p>`, `Category/<c>` and,
/// when a reply is needed, `Needs_Response`.
pub fn derive_labels(record: &ClassificationRecord) -> Vec<String> {
    let mut labels = vec![
        format!("Priority/{}", record.priority),
        format!("Category/{}", record.category),
    ];
    if record.needs_response {
        labels.push(NEEDS_RESPONSE_LABEL.to_string());
    }
    labels
}

// ── Processing state ────────────────────────────────────────────────

/// Per-message lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Fetched,
    Staged,
    Classified,
    Decided,
    Labeled,
    Notified,
    Done,
    Failed,
}

impl MessageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: MessageState) -> bool {
        use MessageState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Fetched, Staged)
                | (Staged, Classified)
                | (Classified, Decided)
                | (Decided, Labeled)
                | (Labeled, Notified)
                | (Labeled, Done)
                | (Notified, Done)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Fetched => "fetched",
            Self::Staged => "staged",
            Self::Classified => "classified",
            Self::Decided => "decided",
            Self::Labeled => "labeled",
            Self::Notified => "notified",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of one side-effecting step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Skipped,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Result of running one message through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedMessage {
    pub id: String,
    pub subject: String,
    pub state: MessageState,
    pub classification_source: Option<ClassificationSource>,
    pub record: Option<ClassificationRecord>,
    pub decision: Option<NotificationDecision>,
    pub labels: StepOutcome,
    pub notification: StepOutcome,
    pub mark_seen: StepOutcome,
    /// Why the message ended in `Failed`.
    pub failure: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedMessage {
    /// A message that failed before producing a record.
    pub fn failed(message: &RawMessage, reason: impl Into<String>) -> Self {
        Self {
            id: message.id.clone(),
            subject: message.subject.clone(),
            state: MessageState::Failed,
            classification_source: None,
            record: None,
            decision: None,
            labels: StepOutcome::Skipped,
            notification: StepOutcome::Skipped,
            mark_seen: StepOutcome::Skipped,
            failure: Some(reason.into()),
            processed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_message_truncates_body() {
        let body = "é".repeat(MAX_BODY_CHARS + 50);
        let msg = RawMessage::new("1", "a@x.com", "s", "d", &body);
        assert_eq!(msg.body.chars().count(), MAX_BODY_CHARS);
    }

    #[test]
    fn truncate_chars_short_input_untouched() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(" medium ".parse::<Priority>().unwrap(), Priority::Medium);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn category_wire_names() {
        assert_eq!(Category::ReceiptsInvoices.to_string(), "Receipts_Invoices");
        assert_eq!(Category::GitHub.to_string(), "GitHub");
        assert_eq!(Category::YouTube.to_string(), "YouTube");
    }

    #[test]
    fn category_parses_variants() {
        assert_eq!(
            "Receipts/Invoices".parse::<Category>().unwrap(),
            Category::ReceiptsInvoices
        );
        assert_eq!(
            "receipts & invoices".parse::<Category>().unwrap(),
            Category::ReceiptsInvoices
        );
        assert_eq!("Github".parse::<Category>().unwrap(), Category::GitHub);
        assert!("Spam".parse::<Category>().is_err());
    }

    #[test]
    fn every_category_round_trips_through_display() {
        for category in Category::ALL {
            assert_eq!(category.to_string().parse::<Category>().unwrap(), category);
        }
    }

    #[test]
    fn category_serializes_with_wire_name() {
        let json = serde_json::to_value(Category::ReceiptsInvoices).unwrap();
        assert_eq!(json, "Receipts_Invoices");
    }

    #[test]
    fn default_record_is_fallback_default() {
        let record = ClassificationRecord::default();
        assert_eq!(record.priority, Priority::Low);
        assert_eq!(record.category, Category::Other);
        assert!(!record.needs_response);
        assert!(!record.contains_tasks);
    }

    #[test]
    fn labels_include_needs_response_only_when_set() {
        let mut record = ClassificationRecord {
            priority: Priority::High,
            category: Category::Work,
            needs_response: false,
            contains_tasks: false,
            summary: "x".into(),
        };
        assert_eq!(
            derive_labels(&record),
            vec!["Priority/High".to_string(), "Category/Work".to_string()]
        );

        record.needs_response = true;
        let labels = derive_labels(&record);
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[2], NEEDS_RESPONSE_LABEL);
    }

    #[test]
    fn state_transitions() {
        use MessageState::*;
        assert!(Fetched.can_advance_to(Staged));
        assert!(Labeled.can_advance_to(Done));
        assert!(Labeled.can_advance_to(Notified));
        assert!(Decided.can_advance_to(Failed));
        assert!(!Fetched.can_advance_to(Classified));
        assert!(!Done.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Failed));
    }

    #[test]
    fn decision_constructors() {
        let skip = NotificationDecision::skip();
        assert!(!skip.should_notify);
        assert!(skip.rendered_message.is_none());

        let notify = NotificationDecision::notify("hi".into());
        assert!(notify.should_notify);
        assert_eq!(notify.rendered_message.as_deref(), Some("hi"));
    }
}
