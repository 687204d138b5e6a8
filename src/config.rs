use crate::error::AppError;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Host used when building audio URLs for the provider.  When unset, the `Host` header of the
    /// incoming webhook is used.
    pub public_host: Option<String>,
    pub openai_api_key: String,
    pub chat_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub session_dir: PathBuf,
    pub audio_dir: PathBuf,
    /// When set, sessions live in Postgres instead of `session_dir`.
    pub database_url: Option<String>,
    pub dashboard_url: String,
    pub dashboard_user_id: i64,
    /// Budget for answering one voice webhook, engine and speech synthesis included.
    pub response_deadline: Duration,
    pub engine_timeout: Duration,
    pub tts_timeout: Duration,
    pub notify_timeout: Duration,
    pub notify_attempts: u32,
    pub notify_retry_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppError::Config(format!("{key} not set")))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            port: parse_or(&lookup, "PORT", 3000)?,
            public_host: optional("PUBLIC_HOST").map(|h| strip_scheme(&h).to_string()),
            openai_api_key: required("OPENAI_API_KEY")?,
            chat_model: optional("OPENAI_CHAT_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".into()),
            tts_model: optional("OPENAI_TTS_MODEL").unwrap_or_else(|| "tts-1".into()),
            tts_voice: optional("OPENAI_TTS_VOICE").unwrap_or_else(|| "verse".into()),
            session_dir: optional("SESSION_DIR")
                .unwrap_or_else(|| "call_recordings".into())
                .into(),
            audio_dir: optional("AUDIO_DIR")
                .unwrap_or_else(|| "audio_files".into())
                .into(),
            database_url: optional("DATABASE_URL"),
            dashboard_url: required("DASHBOARD_WEBHOOK_URL")?,
            dashboard_user_id: parse_or(&lookup, "DASHBOARD_USER_ID", 3)?,
            response_deadline: millis_or(&lookup, "RESPONSE_DEADLINE_MS", 3_000)?,
            engine_timeout: millis_or(&lookup, "ENGINE_TIMEOUT_MS", 2_000)?,
            tts_timeout: millis_or(&lookup, "TTS_TIMEOUT_MS", 1_000)?,
            notify_timeout: millis_or(&lookup, "NOTIFY_TIMEOUT_MS", 15_000)?,
            notify_attempts: parse_or(&lookup, "NOTIFY_ATTEMPTS", 3)?,
            notify_retry_delay: millis_or(&lookup, "NOTIFY_RETRY_DELAY_MS", 2_000)?,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError> {
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, AppError> {
    parse_or(lookup, key, default).map(Duration::from_millis)
}

fn strip_scheme(host: &str) -> &str {
    host.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
}
