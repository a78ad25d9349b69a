//! In-process mailbox and notifier.
//!
//! `MemoryMailbox` behaves like a single-folder IMAP account: messages keep
//! insertion order (oldest first), fetching never changes read state, and
//! label sets are idempotent. Failures can be injected per operation.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::channels::{LabelStore, MailSource, Notifier};
use crate::error::ChannelError;
use crate::pipeline::types::{ClassificationRecord, RawMessage, derive_labels};

#[derive(Debug, Default)]
struct MailboxState {
    messages: Vec<RawMessage>,
    seen: HashSet<String>,
    labels: HashMap<String, BTreeSet<String>>,
    /// Every label ever created, like Gmail's label list.
    created: BTreeSet<String>,
    fail_fetch: Option<String>,
    fail_labels: HashSet<String>,
}

/// Mailbox held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryMailbox {
    state: Mutex<MailboxState>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mailbox pre-filled with unread messages, oldest first.
    pub fn with_messages(messages: Vec<RawMessage>) -> Self {
        Self {
            state: Mutex::new(MailboxState {
                messages,
                ..Default::default()
            }),
        }
    }

    pub async fn push(&self, message: RawMessage) {
        self.state.lock().await.messages.push(message);
    }

    /// Labels currently attached to message `id`.
    pub async fn labels_for(&self, id: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .await
            .labels
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// All labels that exist in the mailbox.
    pub async fn label_names(&self) -> BTreeSet<String> {
        self.state.lock().await.created.clone()
    }

    pub async fn is_seen(&self, id: &str) -> bool {
        self.state.lock().await.seen.contains(id)
    }

    pub async fn unread_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .messages
            .iter()
            .filter(|m| !state.seen.contains(&m.id))
            .count()
    }

    /// Make the next fetches fail with `reason`.
    pub async fn fail_fetch(&self, reason: impl Into<String>) {
        self.state.lock().await.fail_fetch = Some(reason.into());
    }

    /// Make labeling message `id` fail.
    pub async fn fail_labels_for(&self, id: impl Into<String>) {
        self.state.lock().await.fail_labels.insert(id.into());
    }
}

#[async_trait]
impl MailSource for MemoryMailbox {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_unread(&self, limit: usize) -> Result<Vec<RawMessage>, ChannelError> {
        let state = self.state.lock().await;
        if let Some(ref reason) = state.fail_fetch {
            return Err(ChannelError::FetchFailed {
                name: "memory".into(),
                reason: reason.clone(),
            });
        }
        let unread: Vec<&RawMessage> = state
            .messages
            .iter()
            .filter(|m| !state.seen.contains(&m.id))
            .collect();
        let skip = unread.len().saturating_sub(limit);
        Ok(unread.into_iter().skip(skip).cloned().collect())
    }

    async fn mark_seen(&self, id: &str) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        if !state.messages.iter().any(|m| m.id == id) {
            return Err(ChannelError::NotFound {
                name: "memory".into(),
                id: id.to_string(),
            });
        }
        state.seen.insert(id.to_string());
        Ok(())
    }
}

#[async_trait]
impl LabelStore for MemoryMailbox {
    async fn apply_labels(&self, id: &str, record: &ClassificationRecord) -> Result<(), ChannelError> {
        let labels = derive_labels(record);
        let mut state = self.state.lock().await;
        if state.fail_labels.contains(id) {
            return Err(ChannelError::LabelFailed {
                id: id.to_string(),
                label: labels.join(", "),
                reason: "injected failure".into(),
            });
        }
        if !state.messages.iter().any(|m| m.id == id) {
            return Err(ChannelError::NotFound {
                name: "memory".into(),
                id: id.to_string(),
            });
        }
        state.created.extend(labels.iter().cloned());
        state.labels.entry(id.to_string()).or_default().extend(labels);
        Ok(())
    }
}

// ── Notifier ────────────────────────────────────────────────────────

/// Notifier that records every message it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }

    /// Make subsequent sends fail (or succeed again).
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &str) -> Result<(), ChannelError> {
        if *self.failing.lock().await {
            return Err(ChannelError::SendFailed {
                name: "recording".into(),
                reason: "injected failure".into(),
            });
        }
        self.sent.lock().await.push(message.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Category, Priority};

    fn message(id: &str) -> RawMessage {
        RawMessage::new(id, "a@x.com", format!("Subject {id}"), "Mon, 1 Jan 2024", "body")
    }

    fn record(needs_response: bool) -> ClassificationRecord {
        ClassificationRecord {
            priority: Priority::High,
            category: Category::Work,
            needs_response,
            contains_tasks: false,
            summary: "s".into(),
        }
    }

    #[tokio::test]
    async fn fetch_returns_most_recent_oldest_first() {
        let mailbox = MemoryMailbox::with_messages((1..=5).map(|i| message(&i.to_string())).collect());
        let fetched = mailbox.fetch_unread(2).await.unwrap();
        let ids: Vec<&str> = fetched.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "5"]);
        // Fetching does not mark anything read.
        assert_eq!(mailbox.unread_count().await, 5);
    }

    #[tokio::test]
    async fn seen_messages_are_not_fetched_again() {
        let mailbox = MemoryMailbox::with_messages(vec![message("1"), message("2")]);
        mailbox.mark_seen("2").await.unwrap();
        let fetched = mailbox.fetch_unread(10).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, "1");
        assert!(mailbox.is_seen("2").await);
    }

    #[tokio::test]
    async fn labels_accumulate_idempotently() {
        let mailbox = MemoryMailbox::with_messages(vec![message("1")]);
        mailbox.apply_labels("1", &record(true)).await.unwrap();
        mailbox.apply_labels("1", &record(true)).await.unwrap();

        let labels = mailbox.labels_for("1").await;
        assert_eq!(labels.len(), 3);
        assert!(labels.contains("Needs_Response"));
        assert_eq!(mailbox.label_names().await.len(), 3);
    }

    #[tokio::test]
    async fn injected_failures() {
        let mailbox = MemoryMailbox::with_messages(vec![message("1")]);
        mailbox.fail_labels_for("1").await;
        assert!(matches!(
            mailbox.apply_labels("1", &record(false)).await,
            Err(ChannelError::LabelFailed { .. })
        ));

        mailbox.fail_fetch("server down").await;
        assert!(matches!(
            mailbox.fetch_unread(3).await,
            Err(ChannelError::FetchFailed { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_message_is_not_found() {
        let mailbox = MemoryMailbox::new();
        assert!(matches!(
            mailbox.mark_seen("9").await,
            Err(ChannelError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.send("one").await.unwrap();
        notifier.set_failing(true).await;
        assert!(notifier.send("two").await.is_err());
        assert_eq!(notifier.sent().await, vec!["one"]);
    }
}
