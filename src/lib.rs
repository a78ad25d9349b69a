//! Mail triage: classify unread email, label it, and alert on what matters.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
