use crate::audio::{AudioRenderer, SpeechSynthesizer};
use crate::config::Config;
use crate::dialogue::DialogueEngine;
use crate::error::AppError;
use crate::notification::{NotificationDispatcher, ReportSink, RetryPolicy};
use crate::orchestrator::CallOrchestrator;
use crate::session_store::SessionStore;
use crate::tasks::NotificationTasks;

use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn SessionStore>,
    /// "file" or "postgres", for the health report
    pub store_kind: &'static str,
    pub audio: Arc<AudioRenderer>,
    pub orchestrator: CallOrchestrator,
    pub notifications: NotificationTasks,
}

impl AppState {
    /// Wire the collaborators together.  Everything call-specific flows through the orchestrator;
    /// the rest of the state backs the read-only endpoints.
    pub async fn assemble(
        config: Config,
        store: Arc<dyn SessionStore>,
        store_kind: &'static str,
        engine: Arc<dyn DialogueEngine>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self, AppError> {
        let audio = Arc::new(
            AudioRenderer::open(synthesizer, &config.audio_dir, config.tts_timeout).await?,
        );
        let policy = RetryPolicy {
            attempts: config.notify_attempts,
            delay: config.notify_retry_delay,
        };
        let dispatcher = Arc::new(NotificationDispatcher::new(
            sink,
            policy,
            config.dashboard_user_id,
        ));
        let notifications = NotificationTasks::new(dispatcher);
        let orchestrator = CallOrchestrator::new(
            store.clone(),
            engine,
            audio.clone(),
            notifications.clone(),
            config.engine_timeout,
            config.response_deadline,
        );

        Ok(Self {
            config,
            store,
            store_kind,
            audio,
            orchestrator,
            notifications,
        })
    }
}
