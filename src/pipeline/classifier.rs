//! Classifier core: LLM classification with a deterministic fallback.
//!
//! Flow:
//! 1. Truncate the staged text to [`MAX_CLASSIFY_CHARS`]
//! 2. Ask the backend for the five-line classification
//! 3. Parse strictly into a `ClassificationRecord`
//! 4. On any failure (no backend, timeout, quota, bad output) use the rule engine
//!
//! `classify` never fails.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{LlmError, ParseError};
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::rules::FallbackEngine;
use crate::pipeline::types::{
    Category, Classification, ClassificationRecord, ClassificationSource, Priority, truncate_chars,
};

/// Input cap applied before any backend call.
pub const MAX_CLASSIFY_CHARS: usize = 1000;

/// Max tokens for the classification call (five short lines).
const CLASSIFY_MAX_TOKENS: u32 = 300;

/// Temperature for classification (deterministic-ish).
const CLASSIFY_TEMPERATURE: f32 = 0.1;

/// Default bound on a single backend call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Summary used when the backend leaves it blank.
const EMPTY_SUMMARY: &str = "No summary provided.";

/// Classifies staged message text.
pub struct Classifier {
    llm: Option<Arc<dyn LlmProvider>>,
    fallback: FallbackEngine,
    timeout: Duration,
}

impl Classifier {
    /// Backend-backed classifier.
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self {
            llm: Some(llm),
            fallback: FallbackEngine::default_rules(),
            timeout,
        }
    }

    /// Classifier without a backend; always uses the rule engine.
    pub fn offline() -> Self {
        Self {
            llm: None,
            fallback: FallbackEngine::default_rules(),
            timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    /// Classify `raw_text`.
    pub async fn classify(&self, raw_text: &str) -> ClassificationRecord {
        self.classify_detailed(raw_text).await.record
    }

    /// Classify `raw_text` and report which path produced the record.
    pub async fn classify_detailed(&self, raw_text: &str) -> Classification {
        let text = truncate_chars(raw_text, MAX_CLASSIFY_CHARS);

        match self.classify_with_backend(text).await {
            Ok((record, model)) => {
                debug!(model = %model, priority = %record.priority, category = %record.category, "Backend classification");
                Classification {
                    record,
                    source: ClassificationSource::Backend { model },
                }
            }
            Err(reason) => {
                warn!(reason = %reason, "Backend classification unavailable, using fallback rules");
                Classification {
                    record: self.fallback.classify(text),
                    source: ClassificationSource::Fallback { reason },
                }
            }
        }
    }

    async fn classify_with_backend(&self, text: &str) -> Result<(ClassificationRecord, String), String> {
        let llm = self.llm.as_ref().ok_or_else(|| LlmError::NotConfigured.to_string())?;

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(build_user_prompt(text)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = match tokio::time::timeout(self.timeout, llm.complete(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => {
                return Err(LlmError::Timeout {
                    provider: llm.model_name().to_string(),
                    timeout: self.timeout,
                }
                .to_string());
            }
        };

        let record = parse_classification(&response.content).map_err(|e| {
            warn!(raw_response = %response.content, error = %e, "Unparseable classification response");
            format!("parse failed: {e}")
        })?;

        Ok((record, llm.model_name().to_string()))
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt() -> String {
    "You are an email categorization assistant. Analyze emails and categorize them accurately.".to_string()
}

/// Build the classification prompt for a staged message.
fn build_user_prompt(text: &str) -> String {
    let categories = Category::ALL.map(|c| c.as_str()).join("/");
    format!(
        "Analyze this email and categorize it:\n\n\
         {text}\n\n\
         First, understand the intent and context of the email:\n\
         1. Who is the sender and what is their relationship to the recipient?\n\
         2. What is the main purpose of this email?\n\
         3. Is there any urgency or time-sensitivity?\n\
         4. Does it require action from the recipient?\n\
         5. What category best describes this email?\n\n\
         IMPORTANT RULES:\n\
         - Security-related emails (password resets, breach notifications, suspicious logins, phishing, verification requests) are ALWAYS High priority and ALWAYS need a response\n\
         - Financial anomaly notifications (unusual charges, transaction alerts) are High priority with category Receipts_Invoices\n\
         - Emails with deadlines or time-sensitive information are at least Medium priority\n\
         - Emails containing action items or requests need a response\n\
         - Use GitHub for GitHub notifications, YouTube for YouTube notifications, Receipts_Invoices for receipts, invoices and financial documents\n\n\
         Based on your analysis, provide ONLY the following five lines, in this order:\n\
         Priority: [High/Medium/Low]\n\
         Category: [{categories}]\n\
         Needs Response: [Yes/No]\n\
         Contains Tasks: [Yes/No]\n\
         Summary: [1-2 sentence summary of the email's main content and purpose]"
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse the five-line backend response.
///
/// The first non-empty line must be the `Priority` field; `Priority` and
/// `Category` are required. Markdown decoration (fences, bold, bullets) is
/// ignored.
pub fn parse_classification(raw: &str) -> Result<ClassificationRecord, ParseError> {
    let lines: Vec<String> = raw
        .lines()
        .map(normalize_line)
        .filter(|l| !l.is_empty() && !l.starts_with("```"))
        .collect();

    let first = lines.first().ok_or(ParseError::Empty)?;
    if field_value(first, "priority").is_none() {
        return Err(ParseError::MissingLeadingPriority);
    }

    let mut priority = None;
    let mut category = None;
    let mut needs_response = None;
    let mut contains_tasks = None;
    let mut summary = None;

    for line in &lines {
        if let Some(value) = field_value(line, "priority") {
            priority.get_or_insert(parse_priority(value)?);
        } else if let Some(value) = field_value(line, "category") {
            category.get_or_insert(parse_category(value)?);
        } else if let Some(value) = field_value(line, "needs response") {
            needs_response.get_or_insert(parse_yes_no("Needs Response", value)?);
        } else if let Some(value) = field_value(line, "contains tasks") {
            contains_tasks.get_or_insert(parse_yes_no("Contains Tasks", value)?);
        } else if let Some(value) = field_value(line, "summary") {
            summary.get_or_insert(value.to_string());
        }
    }

    let summary = summary
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| EMPTY_SUMMARY.to_string());

    Ok(ClassificationRecord {
        priority: priority.ok_or(ParseError::MissingField("Priority"))?,
        category: category.ok_or(ParseError::MissingField("Category"))?,
        needs_response: needs_response.unwrap_or(false),
        contains_tasks: contains_tasks.unwrap_or(false),
        summary,
    })
}

/// Strip bullets, bold markers and surrounding whitespace.
fn normalize_line(line: &str) -> String {
    let line = line.trim().replace("**", "");
    let line = line.trim_start_matches(['-', '*', '•']).trim();
    line.to_string()
}

/// Value of `label: value` when `line` starts with `label` (case-insensitive).
fn field_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    if key.trim().eq_ignore_ascii_case(label) {
        Some(value.trim())
    } else {
        None
    }
}

/// First word of the value, brackets stripped: `[High] - urgent` → High.
fn leading_word(value: &str) -> &str {
    value
        .split(|c: char| c.is_whitespace() || c == ',' || c == '.')
        .find(|w| !w.is_empty())
        .unwrap_or("")
        .trim_matches(['[', ']'])
}

fn parse_priority(value: &str) -> Result<Priority, ParseError> {
    leading_word(value)
        .parse::<Priority>()
        .map_err(|_| ParseError::InvalidValue {
            field: "Priority",
            value: value.to_string(),
        })
}

/// Whole value first so `Receipts / Invoices` survives, then its first word
/// so `[Work] - related to a project` does.
fn parse_category(value: &str) -> Result<Category, ParseError> {
    value
        .parse::<Category>()
        .or_else(|_| leading_word(value).parse::<Category>())
        .map_err(|_| ParseError::InvalidValue {
            field: "Category",
            value: value.to_string(),
        })
}

fn parse_yes_no(field: &'static str, value: &str) -> Result<bool, ParseError> {
    match leading_word(value).to_ascii_lowercase().as_str() {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        _ => Err(ParseError::InvalidValue {
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::llm::provider::{CompletionResponse, FinishReason};

    // ── Parser tests ────────────────────────────────────────────────

    const WELL_FORMED: &str = "Priority: High\nCategory: Work\nNeeds Response: Yes\nContains Tasks: No\nSummary: Manager asks for the report.";

    #[test]
    fn parse_well_formed_response() {
        let record = parse_classification(WELL_FORMED).unwrap();
        assert_eq!(record.priority, Priority::High);
        assert_eq!(record.category, Category::Work);
        assert!(record.needs_response);
        assert!(!record.contains_tasks);
        assert_eq!(record.summary, "Manager asks for the report.");
    }

    #[test]
    fn parse_tolerates_markdown_decoration() {
        let raw = "```\n**Priority:** Medium\n- **Category:** Receipts_Invoices\n* Needs Response: no\n- Contains Tasks: yes\n- Summary: Invoice attached.\n```";
        let record = parse_classification(raw).unwrap();
        assert_eq!(record.priority, Priority::Medium);
        assert_eq!(record.category, Category::ReceiptsInvoices);
        assert!(!record.needs_response);
        assert!(record.contains_tasks);
    }

    #[test]
    fn parse_takes_leading_word_of_values() {
        let raw = "Priority: [Low] - routine\nCategory: Newsletter\nNeeds Response: No, informational\nContains Tasks: No\nSummary: x";
        let record = parse_classification(raw).unwrap();
        assert_eq!(record.priority, Priority::Low);
        assert!(!record.needs_response);
    }

    #[test]
    fn parse_category_with_trailing_note() {
        let raw = "Priority: [High] - security alert\nCategory: [Work] - related to a project\nNeeds Response: Yes\nContains Tasks: No\nSummary: x";
        let record = parse_classification(raw).unwrap();
        assert_eq!(record.priority, Priority::High);
        assert_eq!(record.category, Category::Work);

        let raw = "Priority: Low\nCategory: Receipts / Invoices\nSummary: x";
        assert_eq!(
            parse_classification(raw).unwrap().category,
            Category::ReceiptsInvoices
        );
    }

    #[test]
    fn parse_rejects_preamble_before_priority() {
        let raw = format!("Here is my analysis:\n{WELL_FORMED}");
        assert_eq!(
            parse_classification(&raw),
            Err(ParseError::MissingLeadingPriority)
        );
    }

    #[test]
    fn parse_rejects_missing_category() {
        let raw = "Priority: High\nNeeds Response: Yes\nSummary: x";
        assert_eq!(
            parse_classification(raw),
            Err(ParseError::MissingField("Category"))
        );
    }

    #[test]
    fn parse_rejects_unknown_category() {
        let raw = "Priority: High\nCategory: Spam\nSummary: x";
        assert!(matches!(
            parse_classification(raw),
            Err(ParseError::InvalidValue { field: "Category", .. })
        ));
    }

    #[test]
    fn parse_rejects_bad_yes_no() {
        let raw = "Priority: Low\nCategory: Other\nNeeds Response: maybe";
        assert!(matches!(
            parse_classification(raw),
            Err(ParseError::InvalidValue { field: "Needs Response", .. })
        ));
    }

    #[test]
    fn parse_empty_response() {
        assert_eq!(parse_classification("  \n "), Err(ParseError::Empty));
    }

    #[test]
    fn parse_defaults_optional_fields() {
        let record = parse_classification("Priority: Low\nCategory: Other").unwrap();
        assert!(!record.needs_response);
        assert!(!record.contains_tasks);
        assert_eq!(record.summary, EMPTY_SUMMARY);
    }

    #[test]
    fn parse_keeps_colons_inside_summary() {
        let raw = "Priority: Low\nCategory: Other\nSummary: Meeting at 10:30 tomorrow";
        let record = parse_classification(raw).unwrap();
        assert_eq!(record.summary, "Meeting at 10:30 tomorrow");
    }

    // ── Prompt tests ────────────────────────────────────────────────

    #[test]
    fn user_prompt_lists_fields_and_categories() {
        let prompt = build_user_prompt("From: a\nSubject: b");
        for field in ["Priority:", "Category:", "Needs Response:", "Contains Tasks:", "Summary:"] {
            assert!(prompt.contains(field), "missing {field}");
        }
        assert!(prompt.contains("Receipts_Invoices"));
        assert!(prompt.contains("Subject: b"));
        assert!(prompt.contains("Security-related"));
    }

    // ── Classifier with mock backends ───────────────────────────────

    /// Mock backend returning a fixed response and recording prompts.
    struct MockLlm {
        response: Result<String, ()>,
        delay: Option<Duration>,
        prompts: Mutex<Vec<CompletionRequest>>,
    }

    impl MockLlm {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(text.to_string()),
                delay: None,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                response: Err(()),
                delay: None,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(WELL_FORMED.to_string()),
                delay: Some(delay),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock-classifier"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.prompts.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.response {
                Ok(text) => Ok(CompletionResponse {
                    content: text.clone(),
                    input_tokens: 10,
                    output_tokens: 10,
                    finish_reason: FinishReason::Stop,
                }),
                Err(()) => Err(LlmError::RateLimited {
                    provider: "mock".into(),
                    reason: "429 quota exceeded".into(),
                }),
            }
        }
    }

    const NEWSLETTER_TEXT: &str = "From: news@product.example\nSubject: Weekly Digest\nBody:\nHere's what's new this week";

    #[tokio::test]
    async fn backend_result_is_used() {
        let llm = MockLlm::replying(WELL_FORMED);
        let classifier = Classifier::new(llm.clone(), DEFAULT_BACKEND_TIMEOUT);

        let result = classifier.classify_detailed(NEWSLETTER_TEXT).await;
        assert_eq!(result.record.category, Category::Work);
        assert_eq!(
            result.source,
            ClassificationSource::Backend {
                model: "mock-classifier".into()
            }
        );

        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].temperature, Some(CLASSIFY_TEMPERATURE));
        assert_eq!(prompts[0].max_tokens, Some(CLASSIFY_MAX_TOKENS));
    }

    #[tokio::test]
    async fn backend_error_falls_back() {
        let classifier = Classifier::new(MockLlm::failing(), DEFAULT_BACKEND_TIMEOUT);
        let result = classifier.classify_detailed(NEWSLETTER_TEXT).await;
        assert!(result.source.is_fallback());
        assert_eq!(result.record.category, Category::Newsletter);
    }

    #[tokio::test]
    async fn malformed_output_falls_back() {
        let classifier = Classifier::new(
            MockLlm::replying("I think this is a newsletter."),
            DEFAULT_BACKEND_TIMEOUT,
        );
        let result = classifier.classify_detailed(NEWSLETTER_TEXT).await;
        match result.source {
            ClassificationSource::Fallback { reason } => assert!(reason.contains("parse failed")),
            other => panic!("Expected fallback, got {other:?}"),
        }
        assert_eq!(result.record.category, Category::Newsletter);
    }

    #[tokio::test]
    async fn timeout_falls_back() {
        let classifier = Classifier::new(
            MockLlm::slow(Duration::from_millis(500)),
            Duration::from_millis(20),
        );
        let result = classifier.classify_detailed(NEWSLETTER_TEXT).await;
        match result.source {
            ClassificationSource::Fallback { reason } => assert!(reason.contains("timed out")),
            other => panic!("Expected fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_classifier_uses_rules() {
        let classifier = Classifier::offline();
        let result = classifier.classify_detailed(NEWSLETTER_TEXT).await;
        assert!(result.source.is_fallback());
        assert_eq!(classifier.classify(NEWSLETTER_TEXT).await, result.record);
    }

    #[tokio::test]
    async fn input_truncated_before_backend_call() {
        let llm = MockLlm::replying(WELL_FORMED);
        let classifier = Classifier::new(llm.clone(), DEFAULT_BACKEND_TIMEOUT);
        let long = format!("Subject: x\nBody:\n{}", "y".repeat(5000));

        classifier.classify(&long).await;

        let prompts = llm.prompts.lock().unwrap();
        let user = &prompts[0].messages[1].content;
        assert!(user.contains(&"y".repeat(MAX_CLASSIFY_CHARS - 20)));
        assert!(!user.contains(&"y".repeat(MAX_CLASSIFY_CHARS)));
    }

    #[tokio::test]
    async fn fallback_sees_truncated_text_only() {
        // The security keyword sits beyond the cap and must not count.
        let text = format!(
            "Subject: Notes\nBody:\n{} password reset",
            "z ".repeat(MAX_CLASSIFY_CHARS)
        );
        let record = Classifier::offline().classify(&text).await;
        assert_eq!(record.priority, Priority::Low);
    }
}
