use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_triage::channels::{ImapMailbox, TelegramNotifier};
use mail_triage::config::TriageConfig;
use mail_triage::error::PipelineError;
use mail_triage::llm::create_failover;
use mail_triage::pipeline::{Classifier, NotificationGate, TriageProcessor};

/// Exit code when the run completed but some messages failed.
const EXIT_PARTIAL_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Error: failed to install rustls crypto provider");
        return ExitCode::FAILURE;
    }

    let config = match TriageConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Hold the guard for the whole run so buffered log lines get flushed.
    let _log_guard = init_tracing(&config);

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Triage run failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Stderr logging, plus a daily-rolling file when `TRIAGE_LOG_DIR` is set.
fn init_tracing(config: &TriageConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-triage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

async fn run(config: TriageConfig) -> anyhow::Result<ExitCode> {
    eprintln!("📬 mail-triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {}@{}", config.mail.username, config.mail.host);
    eprintln!(
        "   Backends: {}",
        config
            .backends
            .iter()
            .map(|b| format!("{} ({})", b.backend.provider_name(), b.model))
            .collect::<Vec<_>>()
            .join(" → ")
    );
    eprintln!("   Batch size: {}\n", config.processor.batch_size);

    let llm = create_failover(&config.backends).context("Failed to create classification backend")?;
    let classifier = Classifier::new(llm, config.backend_timeout);

    let mailbox = Arc::new(ImapMailbox::new(config.mail));
    let notifier =
        Arc::new(TelegramNotifier::new(config.telegram).context("Failed to create Telegram notifier")?);

    let processor = TriageProcessor::new(
        mailbox.clone(),
        mailbox.clone(),
        notifier,
        classifier,
        NotificationGate::new(config.notification),
        config.processor,
    );

    let outcome = processor.run().await;
    mailbox.close().await;

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e @ PipelineError::Fetch(_)) => {
            return Err(anyhow::Error::new(e).context("Could not fetch unread messages"));
        }
        Err(e) => return Err(e.into()),
    };

    println!("{summary}");

    if summary.has_failures() {
        tracing::warn!(failed = summary.failed, total = summary.total, "Run finished with failed messages");
        Ok(ExitCode::from(EXIT_PARTIAL_FAILURE))
    } else {
        tracing::info!(total = summary.total, "Run finished");
        Ok(ExitCode::SUCCESS)
    }
}
