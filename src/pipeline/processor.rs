//! Triage processor: drives each unread message through the pipeline.
//!
//! Per message, strictly one at a time in fetch order:
//! 1. Stage into the single-slot buffer
//! 2. Classify (backend, falling back to rules)
//! 3. Decide whether to notify
//! 4. Apply labels (always)
//! 5. Notify (only when the gate says so)
//! 6. Mark the message seen
//!
//! A failure inside one message, panics included, marks that message
//! `Failed` and the batch moves on. Only a failed fetch aborts the run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::channels::{LabelStore, MailSource, Notifier};
use crate::error::PipelineError;
use crate::pipeline::classifier::Classifier;
use crate::pipeline::gate::NotificationGate;
use crate::pipeline::staging::StagingSlot;
use crate::pipeline::summary::RunSummary;
use crate::pipeline::types::{MessageState, ProcessedMessage, RawMessage, StepOutcome};

/// Default number of messages fetched per run.
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Default pause between two messages.
pub const DEFAULT_MESSAGE_DELAY: Duration = Duration::from_secs(2);

/// Batch shape for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub batch_size: usize,
    /// Inserted between messages, never after the last one.
    pub message_delay: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            message_delay: DEFAULT_MESSAGE_DELAY,
        }
    }
}

/// Pipeline orchestrator.
pub struct TriageProcessor {
    source: Arc<dyn MailSource>,
    labels: Arc<dyn LabelStore>,
    notifier: Arc<dyn Notifier>,
    classifier: Classifier,
    gate: NotificationGate,
    settings: ProcessorSettings,
}

impl TriageProcessor {
    pub fn new(
        source: Arc<dyn MailSource>,
        labels: Arc<dyn LabelStore>,
        notifier: Arc<dyn Notifier>,
        classifier: Classifier,
        gate: NotificationGate,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            source,
            labels,
            notifier,
            classifier,
            gate,
            settings,
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Fetch one batch and process it.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let results = self.run_detailed().await?;
        Ok(RunSummary::from_processed(&results))
    }

    /// Like [`run`](Self::run), returning the per-message results.
    pub async fn run_detailed(&self) -> Result<Vec<ProcessedMessage>, PipelineError> {
        let limit = self.settings.batch_size;
        let mut messages = self
            .source
            .fetch_unread(limit)
            .await
            .map_err(PipelineError::Fetch)?;

        if messages.len() > limit {
            warn!(
                source = self.source.name(),
                fetched = messages.len(),
                limit,
                "Source returned more than requested, keeping the most recent"
            );
            messages.drain(..messages.len() - limit);
        }

        Ok(self.process_batch(messages).await)
    }

    /// Process messages one at a time. Never fails as a whole.
    pub async fn process_batch(&self, messages: Vec<RawMessage>) -> Vec<ProcessedMessage> {
        let count = messages.len();
        info!(count, "Processing message batch");

        let mut slot = StagingSlot::new();
        let mut results = Vec::with_capacity(count);

        for (i, message) in messages.iter().enumerate() {
            let outcome = AssertUnwindSafe(self.process_one(message, &mut slot))
                .catch_unwind()
                .await;
            slot.clear();

            let processed = match outcome {
                Ok(Ok(processed)) => processed,
                Ok(Err(e)) => {
                    error!(id = %message.id, error = %e, "Failed to process message");
                    ProcessedMessage::failed(message, e.to_string())
                }
                Err(panic) => {
                    let e = PipelineError::Panicked {
                        id: message.id.clone(),
                        reason: panic_reason(panic.as_ref()),
                    };
                    error!(id = %message.id, error = %e, "Message processing panicked");
                    ProcessedMessage::failed(message, e.to_string())
                }
            };
            results.push(processed);

            if i + 1 < count && !self.settings.message_delay.is_zero() {
                tokio::time::sleep(self.settings.message_delay).await;
            }
        }

        info!(
            total = count,
            failed = results
                .iter()
                .filter(|r| r.state == MessageState::Failed)
                .count(),
            "Batch processing complete"
        );
        results
    }

    /// Run a single message through every stage.
    async fn process_one(
        &self,
        message: &RawMessage,
        slot: &mut StagingSlot,
    ) -> Result<ProcessedMessage, PipelineError> {
        let mut state = MessageState::Fetched;
        debug!(id = %message.id, subject = %message.subject, "Processing message");

        let staged = slot.stage(message)?;
        advance(&mut state, MessageState::Staged);

        let classification = self.classifier.classify_detailed(staged).await;
        advance(&mut state, MessageState::Classified);
        let record = classification.record;

        let decision = self.gate.decide(&record, &message.sender, &message.subject);
        advance(&mut state, MessageState::Decided);

        let labels = match self.labels.apply_labels(&message.id, &record).await {
            Ok(()) => StepOutcome::Succeeded,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Labeling failed");
                StepOutcome::Failed(e.to_string())
            }
        };
        advance(&mut state, MessageState::Labeled);

        let notification = match decision.rendered_message.as_deref() {
            Some(alert) if decision.should_notify => match self.notifier.send(alert).await {
                Ok(()) => {
                    advance(&mut state, MessageState::Notified);
                    StepOutcome::Succeeded
                }
                Err(e) => {
                    warn!(id = %message.id, notifier = self.notifier.name(), error = %e, "Notification failed");
                    StepOutcome::Failed(e.to_string())
                }
            },
            _ => StepOutcome::Skipped,
        };

        let mark_seen = match self.source.mark_seen(&message.id).await {
            Ok(()) => StepOutcome::Succeeded,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Marking message seen failed");
                StepOutcome::Failed(e.to_string())
            }
        };
        advance(&mut state, MessageState::Done);

        info!(
            id = %message.id,
            priority = %record.priority,
            category = %record.category,
            needs_response = record.needs_response,
            notify = decision.should_notify,
            fallback = classification.source.is_fallback(),
            "Message triaged"
        );

        Ok(ProcessedMessage {
            id: message.id.clone(),
            subject: message.subject.clone(),
            state,
            classification_source: Some(classification.source),
            record: Some(record),
            decision: Some(decision),
            labels,
            notification,
            mark_seen,
            failure: None,
            processed_at: Utc::now(),
        })
    }
}

fn advance(state: &mut MessageState, next: MessageState) {
    debug_assert!(
        state.can_advance_to(next),
        "illegal transition {} -> {}",
        state.label(),
        next.label()
    );
    *state = next;
}

/// Best-effort text of a panic payload.
fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
