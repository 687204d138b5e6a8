use crate::audio::AudioRenderer;
use crate::consts::{APP_GREETING, ENGINE_FALLBACK_MESSAGE, POST_COMPLETION_MESSAGE};
use crate::dialogue::{DialogueContext, DialogueEngine, EngineReply};
use crate::error::AppError;
use crate::notification::CallReport;
use crate::session_store::{CallLocks, SessionStore};
use crate::session_types::{
    lead_keys, CallSession, ReplyMeta, Turn, CONTINUE, END_CALL, UNKNOWN,
};
use crate::tasks::NotificationTasks;
use crate::twilio_types::{RecordingPayload, VoicePayload};

use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// One voice webhook delivery, with absent fields already defaulted.
#[derive(Debug, Clone)]
pub struct VoiceEvent {
    pub call_sid: String,
    pub from: String,
    pub to: String,
    pub call_status: String,
    /// `None` when the provider sent no (or only blank) speech.
    pub speech: Option<String>,
    pub recording_url: Option<String>,
}

fn or_unknown(field: Option<String>) -> String {
    field
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

impl From<VoicePayload> for VoiceEvent {
    fn from(payload: VoicePayload) -> Self {
        Self {
            call_sid: or_unknown(payload.call_sid),
            from: or_unknown(payload.from),
            to: or_unknown(payload.to),
            call_status: or_unknown(payload.call_status),
            speech: payload
                .speech_result
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            recording_url: payload.recording_url.filter(|u| !u.trim().is_empty()),
        }
    }
}

/// What to tell the provider after an event.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub completed: bool,
    pub message: String,
    /// Artifact name from the [`AudioRenderer`]; `None` means speak `message` inline.
    pub audio: Option<String>,
}

/// Drives each call from greeting to hang-up across stateless webhook deliveries.
pub struct CallOrchestrator {
    store: Arc<dyn SessionStore>,
    engine: Arc<dyn DialogueEngine>,
    audio: Arc<AudioRenderer>,
    notifications: NotificationTasks,
    locks: CallLocks,
    engine_deadline: Duration,
    response_deadline: Duration,
}

impl CallOrchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        engine: Arc<dyn DialogueEngine>,
        audio: Arc<AudioRenderer>,
        notifications: NotificationTasks,
        engine_deadline: Duration,
        response_deadline: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            audio,
            notifications,
            locks: CallLocks::default(),
            engine_deadline: engine_deadline.min(response_deadline),
            response_deadline,
        }
    }

    /// Apply one voice event to its call and decide what to say next.
    ///
    /// The load-modify-save cycle runs under the call's lock, and the session is saved whatever
    /// branch was taken.  A report claimed on completion is only queued once that save succeeded.
    /// Speech synthesis only gets whatever is left of the response deadline.
    pub async fn handle_voice_event(&self, event: VoiceEvent) -> Result<Decision, AppError> {
        let started = Instant::now();
        debug!(call_sid=%event.call_sid, from=%event.from, status=%event.call_status, "voice event");
        let (completed, message) = {
            let _guard = self.locks.lock(&event.call_sid).await;
            let mut session = match self.store.load(&event.call_sid).await? {
                Some(session) => session,
                None => {
                    info!(call_sid=%event.call_sid, from=%event.from, "new call");
                    CallSession::new(&event.call_sid, &event.from, &event.to)
                }
            };
            if let Some(url) = &event.recording_url {
                info!(call_sid=%event.call_sid, recording_url=%url, "recording url captured");
                session.recording_url = Some(url.clone());
            }

            let (message, report) = self.advance(&mut session, event.speech.as_deref()).await;

            session.last_updated = Some(OffsetDateTime::now_utc());
            self.store.save(&session).await?;
            if let Some(report) = report {
                self.notifications.enqueue(report);
            }
            (session.is_completed(), message)
        };

        let remaining = self.response_deadline.saturating_sub(started.elapsed());
        let audio = self.audio.synthesize(&event.call_sid, &message, remaining).await;
        Ok(Decision {
            completed,
            message,
            audio,
        })
    }

    async fn advance(
        &self,
        session: &mut CallSession,
        speech: Option<&str>,
    ) -> (String, Option<CallReport>) {
        if session.is_completed() {
            // Late retry from the provider.  Keep what was heard, settle nothing again.
            if let Some(speech) = speech {
                session.transcript.push(Turn::customer(speech));
            }
            debug!(call_sid=%session.call_sid, "event after completion");
            return (POST_COMPLETION_MESSAGE.to_string(), None);
        }

        let Some(speech) = speech else {
            session.transcript.push(Turn::greeting(APP_GREETING));
            debug!(call_sid=%session.call_sid, "greeting caller");
            return (APP_GREETING.to_string(), None);
        };

        info!(call_sid=%session.call_sid, speech=%speech, "caller said");
        session.transcript.push(Turn::customer(speech));
        let reply = self.ask_engine(session, speech).await;
        let extracted = session.merge_lead_info(&reply.lead_info);

        let (message, should_end_call, next_action) = match closing_override(session, &reply) {
            Some(closing) => {
                info!(call_sid=%session.call_sid, "qualifying lead captured; ending call");
                (closing, true, END_CALL.to_string())
            }
            None => (
                reply.message.clone(),
                reply.should_end_call,
                reply.next_action.clone(),
            ),
        };
        let ending = should_end_call || next_action == END_CALL;
        session.transcript.push(Turn::reply(
            &message,
            ReplyMeta {
                lead_info_extracted: extracted,
                confidence: reply.confidence,
                next_action,
                should_end_call,
            },
        ));
        debug!(call_sid=%session.call_sid, lead_info=?session.lead_info, ending, "reply ready");

        let mut report = None;
        if ending {
            session.complete();
            info!(call_sid=%session.call_sid, "call completed");
            report = self.notifications.dispatcher().maybe_notify(session);
        }
        (message, report)
    }

    /// Never fails: an engine error or timeout becomes a "please repeat" reply that keeps the call
    /// going.
    async fn ask_engine(&self, session: &CallSession, speech: &str) -> EngineReply {
        let ctx = DialogueContext {
            call_sid: &session.call_sid,
            speech,
            lead_info: &session.lead_info,
            transcript: &session.transcript,
        };
        let failure = match timeout(self.engine_deadline, self.engine.respond(ctx)).await {
            Ok(Ok(reply)) => return reply,
            Ok(Err(e)) => e,
            Err(_) => AppError::Engine(format!("no reply within {:?}", self.engine_deadline)),
        };
        warn!(call_sid=%session.call_sid, error=%failure, "dialogue engine unavailable; asking caller to repeat");
        EngineReply {
            message: ENGINE_FALLBACK_MESSAGE.to_string(),
            lead_info: serde_json::Map::new(),
            should_end_call: false,
            next_action: CONTINUE.to_string(),
            confidence: 0.0,
        }
    }

    /// Attach a finished recording to its call, completing the call if it was still open.
    /// Returns `false` when the call is unknown.
    pub async fn handle_recording(&self, recording: RecordingPayload) -> Result<bool, AppError> {
        let _guard = self.locks.lock(&recording.call_sid).await;
        let Some(mut session) = self.store.load(&recording.call_sid).await? else {
            warn!(call_sid=%recording.call_sid, "recording for unknown call");
            return Ok(false);
        };
        info!(
            call_sid=%recording.call_sid,
            recording_url=%recording.recording_url,
            duration=?recording.recording_duration,
            "recording completed"
        );
        session.recording_url = Some(recording.recording_url);
        session.recording_sid = recording.recording_sid;
        session.recording_duration = recording.recording_duration;
        session.complete();
        let report = self.notifications.dispatcher().maybe_notify(&mut session);

        session.last_updated = Some(OffsetDateTime::now_utc());
        self.store.save(&session).await?;
        if let Some(report) = report {
            self.notifications.enqueue(report);
        }
        Ok(true)
    }
}

/// Once both contact and project details are known the call is over, whatever the engine thinks,
/// unless it already asked to end.  An `end_call` action counts as asking even without
/// `should_end_call`, and then the engine's own goodbye is kept.  Returns the closing line to use instead of the engine's reply.
pub fn closing_override(session: &CallSession, reply: &EngineReply) -> Option<String> {
    if reply.requests_end() || !session.has_qualifying_lead() {
        return None;
    }
    let name = session.lead(lead_keys::NAME).unwrap_or("there");
    let business = session
        .lead(lead_keys::BUSINESS_TYPE)
        .unwrap_or("organization");
    Some(format!(
        "Perfect! I have your information, {name}. One of our promotional products specialists will contact you within 24 hours with customized options for your {business}. Thank you for calling!"
    ))
}
