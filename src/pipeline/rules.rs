//! Deterministic keyword classifier.
//!
//! Used whenever the LLM backend is unavailable or answers with something
//! unusable. Produces the same five fields as the backend:
//! - Priority: security > financial > urgent > deadline > Low
//! - Category: GitHub > YouTube > Receipts > Newsletter > Promotional > Work > Personal
//!   (everything after YouTube yields to a High priority)
//! - Needs Response / Contains Tasks: phrase scans
//! - Summary: templated from the resolved category
//!
//! `classify` is a pure function of its input text.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::pipeline::types::{Category, ClassificationRecord, Priority};

/// A rule that sets the priority when it matches.
#[derive(Debug, Clone)]
pub struct PriorityRule {
    /// Compiled regex, matched against the lowercased analysis text.
    pub regex: Regex,
    pub priority: Priority,
    /// Why this rule triggers (for logs).
    pub reason: String,
    /// Security-style rules also demand a response.
    pub forces_response: bool,
    /// Category to use unless a stronger category rule applies.
    pub provisional_category: Option<Category>,
}

/// A rule that sets the category when it matches.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub regex: Regex,
    pub category: Category,
    /// Skip this rule when priority is already High, so a security or
    /// financial classification is never relabeled by a keyword.
    pub yields_to_high: bool,
}

/// Keyword rule engine.
pub struct FallbackEngine {
    priority_rules: Vec<PriorityRule>,
    category_rules: Vec<CategoryRule>,
    response_regex: Regex,
    task_regex: Regex,
}

static DEFAULT_ENGINE: LazyLock<FallbackEngine> = LazyLock::new(FallbackEngine::default_rules);

/// Classify `text` with the default rule set.
pub fn classify_fallback(text: &str) -> ClassificationRecord {
    DEFAULT_ENGINE.classify(text)
}

fn word_rule(pattern: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b(?:{pattern})\b")).unwrap()
}

impl FallbackEngine {
    /// Create the engine with the canonical keyword sets.
    pub fn default_rules() -> Self {
        let priority_rules = vec![
            PriorityRule {
                regex: word_rule(
                    r"passwords?|passcode|reset|security (?:alert|notice|warning|code)|breach(?:es|ed)?|hack(?:ed|er)?|suspicious|unauthori[sz]ed|phishing|fraud(?:ulent)?|verify|verification|(?:log-?in|sign-?in|sign in) attempt|new (?:log-?in|sign-?in|sign in)|two-factor|2fa|compromised",
                ),
                priority: Priority::High,
                reason: "security-related content".into(),
                forces_response: true,
                provisional_category: Some(Category::Personal),
            },
            PriorityRule {
                regex: word_rule(
                    r"unusual (?:charge|activity|transaction|spending)|charges?|charged|transactions?|bank|credit card|debit card|card ending|overdraft|account balance|withdrawal",
                ),
                priority: Priority::High,
                reason: "financial notification".into(),
                forces_response: false,
                provisional_category: Some(Category::ReceiptsInvoices),
            },
            PriorityRule {
                regex: word_rule(
                    r"urgent|urgently|asap|emergency|critical|immediately|immediate action",
                ),
                priority: Priority::High,
                reason: "urgent content".into(),
                forces_response: false,
                provisional_category: None,
            },
            PriorityRule {
                regex: word_rule(
                    r"deadline|due (?:date|today|tomorrow|by|on)|expires?|expiring|time[- ]sensitive|reminder|by end of (?:day|week)|by eod",
                ),
                priority: Priority::Medium,
                reason: "deadline or time-sensitive content".into(),
                forces_response: false,
                provisional_category: None,
            },
        ];

        let category_rules = vec![
            CategoryRule {
                regex: word_rule(r"github|pull request|merge request|repository|repo|commits?|committed"),
                category: Category::GitHub,
                yields_to_high: false,
            },
            CategoryRule {
                regex: word_rule(
                    r"youtube|youtu\.be|new video|uploaded a video|premieres?|live ?stream|your channel",
                ),
                category: Category::YouTube,
                yields_to_high: false,
            },
            CategoryRule {
                regex: word_rule(
                    r"receipts?|invoices?|order confirmation|order confirmed|your order|purchase[ds]?|payments?|billing|bill",
                ),
                category: Category::ReceiptsInvoices,
                yields_to_high: true,
            },
            CategoryRule {
                regex: word_rule(
                    r"newsletters?|unsubscribe|subscribed|digest|weekly|monthly|this week|what's new|edition",
                ),
                category: Category::Newsletter,
                yields_to_high: true,
            },
            CategoryRule {
                regex: Regex::new(
                    r"(?i)\b(?:offers?|discounts?|sale|promotion|promo|deals?|limited time|coupons?|free shipping|exclusive|save \d+)\b|\d+% off",
                )
                .unwrap(),
                category: Category::Promotional,
                yields_to_high: true,
            },
            CategoryRule {
                regex: word_rule(
                    r"jobs?|interview|application|career|position|project|meetings?|standup|stand-up|proposal|contract|client",
                ),
                category: Category::Work,
                yields_to_high: true,
            },
            CategoryRule {
                regex: word_rule(r"hi|hello|hey|dear|friend|family|mom|dad|birthday|personal"),
                category: Category::Personal,
                yields_to_high: true,
            },
        ];

        let response_regex = word_rule(
            r"please (?:respond|reply|confirm|advise)|reply|respond|answer|requests?|requested|action items?|action required|let (?:me|us) know|get back to (?:me|us)|rsvp|(?:can|could|would) you|confirm (?:your|by|that|whether)|approve|approval|awaiting your|your (?:response|feedback|input)",
        );

        let task_regex = word_rule(
            r"tasks?|todo|to-do|action items?|assignment|complete by|due|deliverables?|checklist|follow[- ]up",
        );

        Self {
            priority_rules,
            category_rules,
            response_regex,
            task_regex,
        }
    }

    /// Classify a staged message text. Total: always returns a record.
    pub fn classify(&self, text: &str) -> ClassificationRecord {
        let subject = extract_header(text, "Subject:");
        let sender = extract_header(text, "From:");
        let analysis = format!(
            "{} {} {}",
            subject.unwrap_or_default(),
            sender.unwrap_or_default(),
            text
        )
        .to_lowercase();

        let mut priority = Priority::Low;
        let mut needs_response = false;
        let mut category = Category::Other;

        if let Some(rule) = self.priority_rules.iter().find(|r| r.regex.is_match(&analysis)) {
            debug!(reason = %rule.reason, priority = %rule.priority, "Fallback priority rule matched");
            priority = rule.priority;
            needs_response = rule.forces_response;
            if let Some(provisional) = rule.provisional_category {
                category = provisional;
            }
        }

        let high = priority == Priority::High;
        if let Some(rule) = self
            .category_rules
            .iter()
            .filter(|r| !(high && r.yields_to_high))
            .find(|r| r.regex.is_match(&analysis))
        {
            category = rule.category;
        }

        needs_response = needs_response || self.response_regex.is_match(&analysis);
        let contains_tasks = self.task_regex.is_match(&analysis);
        let summary = summarize(category, sender, subject);

        ClassificationRecord {
            priority,
            category,
            needs_response,
            contains_tasks,
            summary,
        }
    }
}

impl Default for FallbackEngine {
    fn default() -> Self {
        Self::default_rules()
    }
}

/// Value of the first `name` header line, if present and non-empty.
fn extract_header<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    text.lines()
        .find_map(|line| line.strip_prefix(name))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn summarize(category: Category, sender: Option<&str>, subject: Option<&str>) -> String {
    match category {
        Category::Newsletter => {
            format!("Newsletter from {}", sender.unwrap_or("unknown sender"))
        }
        Category::Promotional => format!(
            "Promotional email about {}",
            subject.unwrap_or("offers or discounts")
        ),
        Category::GitHub => "GitHub notification or update".to_string(),
        Category::YouTube => "YouTube notification or update".to_string(),
        Category::ReceiptsInvoices => {
            format!("Receipt or invoice from {}", sender.unwrap_or("a service"))
        }
        Category::Work => format!(
            "Work-related email about {}",
            subject.unwrap_or("a project or task")
        ),
        Category::Personal => format!("Personal email from {}", sender.unwrap_or("someone")),
        Category::Other => format!("Email about {}", subject.unwrap_or("unknown topic")),
    }
}
