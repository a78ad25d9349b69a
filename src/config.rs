//! Configuration, read once from the environment at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::{ImapConfig, TelegramConfig};
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::pipeline::classifier::DEFAULT_BACKEND_TIMEOUT;
use crate::pipeline::gate::NotificationPolicy;
use crate::pipeline::processor::{DEFAULT_BATCH_SIZE, DEFAULT_MESSAGE_DELAY, ProcessorSettings};
use crate::pipeline::types::Category;

const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";

/// Everything the binary needs for one run.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub mail: ImapConfig,
    pub telegram: TelegramConfig,
    /// Backends in failover order (Gemini first, then Groq).
    pub backends: Vec<LlmConfig>,
    pub backend_timeout: Duration,
    pub processor: ProcessorSettings,
    pub notification: NotificationPolicy,
    /// Directory for daily log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl TriageConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let mail = ImapConfig {
            host: env
                .optional("IMAP_HOST")
                .unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string()),
            port: env.parse_or("IMAP_PORT", DEFAULT_IMAP_PORT)?,
            username: env.required("GMAIL_USERNAME")?,
            password: SecretString::from(env.required("GMAIL_APP_PASSWORD")?),
        };

        let mut backends = Vec::new();
        if let Some(key) = env.optional("GEMINI_API_KEY") {
            backends.push(LlmConfig {
                backend: LlmBackend::Gemini,
                api_key: SecretString::from(key),
                model: env
                    .optional("GEMINI_MODEL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            });
        }
        if let Some(key) = env.optional("GROQ_API_KEY") {
            backends.push(LlmConfig {
                backend: LlmBackend::Groq,
                api_key: SecretString::from(key),
                model: env
                    .optional("GROQ_MODEL")
                    .unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string()),
            });
        }
        if backends.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "GEMINI_API_KEY or GROQ_API_KEY".into(),
                hint: "Set at least one classification backend key".into(),
            });
        }

        let telegram = TelegramConfig {
            bot_token: SecretString::from(env.required("TELEGRAM_BOT_TOKEN")?),
            chat_id: env.required("TELEGRAM_CHAT_ID")?,
        };

        let batch_size = env.parse_or("EMAIL_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_BATCH_SIZE".into(),
                message: "must be greater than zero".into(),
            });
        }
        let processor = ProcessorSettings {
            batch_size,
            message_delay: Duration::from_secs(
                env.parse_or("EMAIL_DELAY_SECS", DEFAULT_MESSAGE_DELAY.as_secs())?,
            ),
        };

        let timeout_secs = env.parse_or("BACKEND_TIMEOUT_SECS", DEFAULT_BACKEND_TIMEOUT.as_secs())?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "BACKEND_TIMEOUT_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }

        let notification = NotificationPolicy {
            notify_on_high_priority: env.flag("NOTIFY_ON_HIGH_PRIORITY", true)?,
            notify_on_needs_response: env.flag("NOTIFY_ON_NEEDS_RESPONSE", true)?,
            extra_muted_categories: env.categories("NOTIFY_MUTED_CATEGORIES")?,
        };

        Ok(Self {
            mail,
            telegram,
            backends,
            backend_timeout: Duration::from_secs(timeout_secs),
            processor,
            notification,
            log_dir: env.optional("TRIAGE_LOG_DIR").map(PathBuf::from),
        })
    }
}

/// Typed accessors over a key lookup.
struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            }),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("'{v}' is not a boolean"),
                }),
            },
        }
    }

    fn categories(&self, key: &str) -> Result<Vec<Category>, ConfigError> {
        self.optional(key)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<Category>()
                    .map_err(|message| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("GMAIL_USERNAME", "me@gmail.com"),
            ("GMAIL_APP_PASSWORD", "abcd efgh"),
            ("GEMINI_API_KEY", "gem-key"),
            ("TELEGRAM_BOT_TOKEN", "123:ABC"),
            ("TELEGRAM_CHAT_ID", "42"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<TriageConfig, ConfigError> {
        TriageConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_applied() {
        let config = load(&base()).unwrap();
        assert_eq!(config.mail.host, "imap.gmail.com");
        assert_eq!(config.mail.port, 993);
        assert_eq!(config.mail.password.expose_secret(), "abcd efgh");
        assert_eq!(config.processor, ProcessorSettings::default());
        assert_eq!(config.backend_timeout, Duration::from_secs(30));
        assert_eq!(config.notification, NotificationPolicy::strict());
        assert!(config.log_dir.is_none());

        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].backend, LlmBackend::Gemini);
        assert_eq!(config.backends[0].model, "gemini-2.5-flash");
    }

    #[test]
    fn both_backends_in_failover_order() {
        let mut vars = base();
        vars.insert("GROQ_API_KEY", "gsk");
        vars.insert("GROQ_MODEL", "llama-3.1-8b-instant");
        let config = load(&vars).unwrap();
        let backends: Vec<LlmBackend> = config.backends.iter().map(|b| b.backend).collect();
        assert_eq!(backends, vec![LlmBackend::Gemini, LlmBackend::Groq]);
        assert_eq!(config.backends[1].model, "llama-3.1-8b-instant");
    }

    #[test]
    fn no_backend_key_is_an_error() {
        let mut vars = base();
        vars.remove("GEMINI_API_KEY");
        assert!(matches!(load(&vars), Err(ConfigError::MissingRequired { .. })));

        vars.insert("GEMINI_API_KEY", "   ");
        assert!(matches!(load(&vars), Err(ConfigError::MissingRequired { .. })));
    }

    #[test]
    fn missing_credentials() {
        for key in ["GMAIL_USERNAME", "GMAIL_APP_PASSWORD", "TELEGRAM_BOT_TOKEN", "TELEGRAM_CHAT_ID"] {
            let mut vars = base();
            vars.remove(key);
            match load(&vars) {
                Err(ConfigError::MissingEnvVar(missing)) => assert_eq!(missing, key),
                other => panic!("Expected MissingEnvVar({key}), got {other:?}"),
            }
        }
    }

    #[test]
    fn batch_size_validation() {
        let mut vars = base();
        vars.insert("EMAIL_BATCH_SIZE", "0");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidValue { .. })));

        vars.insert("EMAIL_BATCH_SIZE", "ten");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidValue { .. })));

        vars.insert("EMAIL_BATCH_SIZE", "10");
        vars.insert("EMAIL_DELAY_SECS", "0");
        let config = load(&vars).unwrap();
        assert_eq!(config.processor.batch_size, 10);
        assert!(config.processor.message_delay.is_zero());
    }

    #[test]
    fn notification_overrides() {
        let mut vars = base();
        vars.insert("NOTIFY_ON_HIGH_PRIORITY", "false");
        vars.insert("NOTIFY_MUTED_CATEGORIES", "GitHub, YouTube");
        let config = load(&vars).unwrap();
        assert!(!config.notification.notify_on_high_priority);
        assert!(config.notification.notify_on_needs_response);
        assert_eq!(
            config.notification.extra_muted_categories,
            vec![Category::GitHub, Category::YouTube]
        );

        vars.insert("NOTIFY_MUTED_CATEGORIES", "Spam");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidValue { .. })));

        vars.insert("NOTIFY_MUTED_CATEGORIES", "");
        vars.insert("NOTIFY_ON_NEEDS_RESPONSE", "maybe");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn log_dir_and_imap_overrides() {
        let mut vars = base();
        vars.insert("TRIAGE_LOG_DIR", "/var/log/triage");
        vars.insert("IMAP_HOST", "imap.example.com");
        vars.insert("IMAP_PORT", "1993");
        let config = load(&vars).unwrap();
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/triage")));
        assert_eq!(config.mail.host, "imap.example.com");
        assert_eq!(config.mail.port, 1993);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = load(&base()).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("abcd efgh"));
        assert!(!debug.contains("gem-key"));
        assert!(!debug.contains("123:ABC"));
    }
}
