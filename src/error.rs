//! Error types for mail-triage.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors from the mail, label and notify collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Fetch from {name} failed: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("Authentication failed for {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Applying label {label} to message {id} failed: {reason}")]
    LabelFailed {
        id: String,
        label: String,
        reason: String,
    },

    #[error("Failed to send on {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Rate limited on {name}")]
    RateLimited { name: String },

    #[error("Message {id} not found on {name}")]
    NotFound { name: String, id: String },

    #[error("Protocol error on {name}: {reason}")]
    Protocol { name: String, reason: String },
}

/// Classification backend errors. Never escape the classifier.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited or out of quota: {reason}")]
    RateLimited { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("No classification backend configured")]
    NotConfigured,
}

/// The backend answered, but not in the five-line classification format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("response is empty")]
    Empty,

    #[error("response does not start with the Priority field")]
    MissingLeadingPriority,

    #[error("response is missing the {0} field")]
    MissingField(&'static str),

    #[error("invalid value for {field}: '{value}'")]
    InvalidValue { field: &'static str, value: String },
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Fetching unread messages failed: {0}")]
    Fetch(#[source] ChannelError),

    #[error("Staging failed: {0}")]
    Staging(String),

    #[error("Processing message {id} panicked: {reason}")]
    Panicked { id: String, reason: String },
}
