use crate::audio::SpeechSynthesizer;
use crate::config::Config;
use crate::dialogue::{DialogueContext, DialogueEngine, EngineReply};
use crate::error::AppError;
use crate::notification::{CallReport, ReportSink};
use crate::session_store::{FileSessionStore, SessionStore};
use crate::session_types::CONTINUE;
use crate::types::AppState;

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub fn engine_reply(message: &str, lead_info: serde_json::Value) -> EngineReply {
    EngineReply {
        message: message.to_string(),
        lead_info: lead_info.as_object().cloned().unwrap_or_default(),
        should_end_call: false,
        next_action: CONTINUE.to_string(),
        confidence: 0.8,
    }
}

/// Answers from a script, then with a bland follow-up question once the script runs out.
#[derive(Default)]
pub struct ScriptedEngine {
    pub replies: Mutex<VecDeque<EngineReply>>,
    pub fail: bool,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn with_replies(replies: Vec<EngineReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl DialogueEngine for ScriptedEngine {
    async fn respond(&self, _ctx: DialogueContext<'_>) -> Result<EngineReply, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(AppError::Engine("scripted outage".to_string()));
        }
        let next = self.replies.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| engine_reply("Tell me more.", serde_json::json!({}))))
    }
}

#[derive(Default)]
pub struct ScriptedSpeech {
    pub calls: AtomicUsize,
    pub delay: Duration,
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSpeech {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(b"ID3-fake-mp3".to_vec())
    }
}

pub struct FailingSpeech;

#[async_trait]
impl SpeechSynthesizer for FailingSpeech {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, AppError> {
        Err(AppError::Synthesis("scripted outage".to_string()))
    }
}

/// Fails the first `failures_before_success` posts, then accepts.
#[derive(Default)]
pub struct FlakySink {
    pub failures_before_success: u32,
    pub calls: AtomicU32,
    pub posted: Mutex<Vec<CallReport>>,
}

#[async_trait]
impl ReportSink for FlakySink {
    async fn post(&self, report: &CallReport) -> Result<(), AppError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            return Err(AppError::Notification("503 Service Unavailable".to_string()));
        }
        self.posted.lock().unwrap().push(report.clone());
        Ok(())
    }
}

pub fn test_config(dir: &TempDir, engine_timeout: Duration, response_deadline: Duration) -> Config {
    let mut vars: HashMap<&str, String> = HashMap::new();
    vars.insert("OPENAI_API_KEY", "sk-test".into());
    vars.insert("DASHBOARD_WEBHOOK_URL", "http://127.0.0.1:9/calls".into());
    vars.insert("SESSION_DIR", dir.path().join("sessions").display().to_string());
    vars.insert("AUDIO_DIR", dir.path().join("audio").display().to_string());
    vars.insert("ENGINE_TIMEOUT_MS", engine_timeout.as_millis().to_string());
    vars.insert("RESPONSE_DEADLINE_MS", response_deadline.as_millis().to_string());
    vars.insert("NOTIFY_RETRY_DELAY_MS", "1".into());
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// A fully wired [`AppState`] over temp directories and scripted collaborators.
pub struct Harness {
    pub state: Arc<AppState>,
    pub engine: Arc<ScriptedEngine>,
    pub speech: Arc<ScriptedSpeech>,
    pub sink: Arc<FlakySink>,
    _dir: TempDir,
}

impl Harness {
    pub async fn new(engine: ScriptedEngine) -> Self {
        Self::with_engine_deadline(engine, Duration::from_secs(2)).await
    }

    pub async fn with_engine_deadline(engine: ScriptedEngine, deadline: Duration) -> Self {
        Self::build(engine, ScriptedSpeech::default(), None, deadline, Duration::from_secs(5)).await
    }

    pub async fn with_store(engine: ScriptedEngine, store: Arc<dyn SessionStore>) -> Self {
        Self::build(
            engine,
            ScriptedSpeech::default(),
            Some(store),
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
        .await
    }

    /// Slow collaborators racing a tight response deadline.
    pub async fn with_deadlines(
        engine: ScriptedEngine,
        speech: ScriptedSpeech,
        engine_deadline: Duration,
        response_deadline: Duration,
    ) -> Self {
        Self::build(engine, speech, None, engine_deadline, response_deadline).await
    }

    async fn build(
        engine: ScriptedEngine,
        speech: ScriptedSpeech,
        store: Option<Arc<dyn SessionStore>>,
        engine_deadline: Duration,
        response_deadline: Duration,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, engine_deadline, response_deadline);
        let store = match store {
            Some(store) => store,
            None => Arc::new(FileSessionStore::open(&config.session_dir).await.unwrap()),
        };
        let engine = Arc::new(engine);
        let speech = Arc::new(speech);
        let sink = Arc::new(FlakySink::default());
        let state = AppState::assemble(
            config,
            store,
            "file",
            engine.clone(),
            speech.clone(),
            sink.clone(),
        )
        .await
        .unwrap();
        Self {
            state: Arc::new(state),
            engine,
            speech,
            sink,
            _dir: dir,
        }
    }
}

impl Deref for Harness {
    type Target = AppState;

    fn deref(&self) -> &AppState {
        &self.state
    }
}
