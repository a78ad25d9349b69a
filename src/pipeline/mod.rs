//! Email triage pipeline.
//!
//! Every unread message flows through:
//! 1. `StagingSlot::stage()`: render into the single-slot buffer
//! 2. `Classifier::classify_detailed()`: backend classification, rules on failure
//! 3. `NotificationGate::decide()`: pure notify/skip decision
//! 4. `LabelStore::apply_labels()` and `Notifier::send()`: side effects
//!
//! `TriageProcessor` owns the loop and isolates per-message failures.

pub mod classifier;
pub mod gate;
pub mod processor;
pub mod rules;
pub mod staging;
pub mod summary;
pub mod types;

pub use classifier::Classifier;
pub use gate::{NotificationGate, NotificationPolicy};
pub use processor::{ProcessorSettings, TriageProcessor};
pub use summary::RunSummary;
