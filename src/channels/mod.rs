//! Collaborator interfaces for mail I/O and notifications.
//!
//! - [`MailSource`]: fetch unread messages, mark them seen
//! - [`LabelStore`]: attach classification labels to a message
//! - [`Notifier`]: deliver an alert to the user
//!
//! Production implementations live in [`imap`] and [`telegram`]; [`memory`]
//! holds in-process versions used by tests and dry runs.

pub mod imap;
pub mod memory;
pub mod telegram;

pub use imap::{ImapConfig, ImapMailbox};
pub use memory::{MemoryMailbox, RecordingNotifier};
pub use telegram::{TelegramConfig, TelegramNotifier};

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::pipeline::types::{ClassificationRecord, RawMessage};

/// Source of unread messages.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Source name (for logging).
    fn name(&self) -> &str;

    /// Fetch at most `limit` unread messages: the most recent ones, oldest
    /// first. Fetching does not change the read state.
    async fn fetch_unread(&self, limit: usize) -> Result<Vec<RawMessage>, ChannelError>;

    /// Mark a processed message as read.
    async fn mark_seen(&self, id: &str) -> Result<(), ChannelError>;
}

/// Destination for classification labels.
#[async_trait]
pub trait LabelStore: Send + Sync {
    /// Apply the labels derived from `record` to message `id`.
    ///
    /// Creates missing labels first; applying the same labels twice leaves
    /// the message unchanged.
    async fn apply_labels(&self, id: &str, record: &ClassificationRecord) -> Result<(), ChannelError>;
}

/// Outbound alert transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &str) -> Result<(), ChannelError>;
}
