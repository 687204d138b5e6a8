use crate::error::AppError;
use crate::openai_types::OpenAISpeechPayload;
use crate::session_store::{file_stem, write_atomically};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Encoded mp3 bytes for `text`.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AppError>;
}

pub struct OpenAiSpeech {
    pub http_client: reqwest::Client,
    pub api_key: String,
    pub model: String,
    pub voice: String,
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AppError> {
        let url = "https://api.openai.com/v1/audio/speech";
        let payload = OpenAISpeechPayload {
            model: &self.model,
            voice: &self.voice,
            input: text,
            speed: 1.1,
            response_format: "mp3",
        };
        let key = self.api_key.as_str();
        let resp = self
            .http_client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!(error=%e, "failed to send speech request to OpenAI");
                AppError::Synthesis(format!("request: {e}"))
            })?;
        let bytes = resp.bytes().await.map_err(|e| {
            error!(error=%e, "failed to read speech bytes from OpenAI");
            AppError::Synthesis(format!("body: {e}"))
        })?;
        if bytes.is_empty() {
            return Err(AppError::Synthesis("empty audio".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

/// Turns reply text into an audio artifact the provider can fetch by name.
pub struct AudioRenderer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    dir: PathBuf,
    deadline: Duration,
}

impl AudioRenderer {
    pub async fn open(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        dir: impl Into<PathBuf>,
        deadline: Duration,
    ) -> Result<Self, AppError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            error!(error=%e, dir=?dir, "failed to create audio directory");
            AppError::Synthesis(format!("create {}: {e}", dir.display()))
        })?;
        Ok(Self {
            synthesizer,
            dir,
            deadline,
        })
    }

    /// The artifact name for `message` on `call_sid`, or `None` when nothing could be produced
    /// within `budget` (capped by the renderer's own deadline) and the caller should fall back to
    /// inline speech.
    pub async fn synthesize(&self, call_sid: &str, message: &str, budget: Duration) -> Option<String> {
        let name = artifact_name(call_sid, message);
        let path = self.dir.join(&name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(audio=%name, "reusing synthesized audio");
            return Some(name);
        }

        let deadline = self.deadline.min(budget);
        if deadline.is_zero() {
            warn!(call_sid=%call_sid, "no time left for speech synthesis");
            return None;
        }
        let bytes = match timeout(deadline, self.synthesizer.synthesize(message)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(error=%e, call_sid=%call_sid, "speech synthesis failed");
                return None;
            }
            Err(_) => {
                warn!(call_sid=%call_sid, deadline=?deadline, "speech synthesis timed out");
                return None;
            }
        };
        if let Err(e) = write_atomically(&path, &bytes).await {
            error!(error=%e, path=?path, "failed to write audio file");
            return None;
        }
        info!(audio=%name, bytes=bytes.len(), "saved synthesized audio");
        Some(name)
    }

    /// Bytes of a previously synthesized artifact.
    pub async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, AppError> {
        if !is_artifact_name(name) {
            return Ok(None);
        }
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!(error=%e, audio=%name, "failed to read audio file");
                Err(AppError::Synthesis(format!("read {name}: {e}")))
            }
        }
    }
}

/// Stable per call and per message, so identical prompts are synthesized once and two calls never
/// share a file.
pub fn artifact_name(call_sid: &str, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(call_sid.as_bytes());
    hasher.update([0u8]);
    hasher.update(message.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("voice_{}_{}.mp3", file_stem(call_sid), &digest[..16])
}

fn is_artifact_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
