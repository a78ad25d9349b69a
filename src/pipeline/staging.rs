//! Single-slot scratch buffer for "the message currently being processed".
//!
//! The orchestrator renders each message into the slot, classifies the
//! staged text, and clears the slot before the next message. Staging into
//! an occupied slot is an error: two messages never share it.

use crate::error::PipelineError;
use crate::pipeline::types::RawMessage;

/// Render a message in the staged text layout consumed by the classifier.
pub fn render_staged(message: &RawMessage) -> String {
    format!(
        "From: {}\nSubject: {}\nDate: {}\nID: {}\nBody:\n{}\n",
        message.sender, message.subject, message.date, message.id, message.body
    )
}

/// Capacity-one buffer holding the staged text of one message.
#[derive(Debug, Default)]
pub struct StagingSlot {
    current: Option<Staged>,
}

#[derive(Debug)]
struct Staged {
    id: String,
    text: String,
}

impl StagingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `message`, returning the staged text.
    pub fn stage(&mut self, message: &RawMessage) -> Result<&str, PipelineError> {
        if let Some(ref staged) = self.current {
            return Err(PipelineError::Staging(format!(
                "slot still holds message {} while staging {}",
                staged.id, message.id
            )));
        }
        let staged = self.current.insert(Staged {
            id: message.id.clone(),
            text: render_staged(message),
        });
        Ok(&staged.text)
    }

    /// Id of the staged message, if any.
    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.id.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
