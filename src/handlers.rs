use crate::consts::{AUDIO_ROUTE_PREFIX, VOICE_WEBHOOK_PATH};
use crate::orchestrator::VoiceEvent;
use crate::response;
use crate::session_types::now_rfc3339;
use crate::stats::{call_stats, recordings_overview};
use crate::twilio_types::{RecordingPayload, RecordingStatusPayload, VoicePayload};
use crate::types::AppState;

use axum::{
    body::Bytes,
    extract::{Host, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, trace, warn};

pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route(VOICE_WEBHOOK_PATH, post(voice_webhook))
        .route("/webhook/recording", post(recording_webhook))
        .route("/webhook/recording-status", post(recording_status_webhook))
        .route(&format!("{AUDIO_ROUTE_PREFIX}/:filename"), get(serve_audio))
        .route("/calls/all-recordings", get(list_recordings))
        .route("/calls/stats", get(get_call_stats))
        .route("/calls/recordings/:call_sid", get(get_recording))
        .route("/health", get(health))
        .route("/", get(root))
        .with_state(app_state)
}

fn xml(twiml: String) -> Response {
    trace!("twiml: '{}'", twiml);
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/xml"),
    );
    (StatusCode::OK, headers, twiml).into_response()
}

/// Public URL the provider fetches an audio artifact from.
fn audio_url(app_state: &AppState, host: Option<&str>, name: &str) -> String {
    let host = app_state
        .config
        .public_host
        .as_deref()
        .or(host)
        .unwrap_or("localhost");
    format!("https://{host}{AUDIO_ROUTE_PREFIX}/{name}")
}

/// Always answers with TwiML, whatever arrived and whatever went wrong.
pub async fn voice_webhook(
    host: Option<Host>,
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let payload = serde_urlencoded::from_bytes::<VoicePayload>(&body).unwrap_or_else(|e| {
        warn!(error=%e, "unreadable voice webhook body; using defaults");
        VoicePayload::default()
    });
    let event = VoiceEvent::from(payload);
    let call_sid = event.call_sid.clone();

    let twiml = match app_state.orchestrator.handle_voice_event(event).await {
        Ok(decision) => {
            let url = decision.audio.as_deref().map(|name| {
                audio_url(&app_state, host.as_ref().map(|Host(h)| h.as_str()), name)
            });
            response::render(decision.completed, &decision.message, url.as_deref())
        }
        Err(e) => {
            error!(error=%e, call_sid=%call_sid, "voice webhook failed; answering with apology");
            response::apology()
        }
    };
    xml(twiml)
}

pub async fn recording_webhook(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let payload = match serde_urlencoded::from_bytes::<RecordingPayload>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error=%e, "failed to deserialize recording payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "message": "Bad request"})),
            )
                .into_response();
        }
    };
    let call_sid = payload.call_sid.clone();
    match app_state.orchestrator.handle_recording(payload).await {
        Ok(_) => Json(json!({"status": "success", "message": "Recording processed"})).into_response(),
        Err(e) => {
            error!(error=%e, call_sid=%call_sid, "failed to process recording");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": "Recording not processed"})),
            )
                .into_response()
        }
    }
}

pub async fn recording_status_webhook(body: Bytes) -> Response {
    match serde_urlencoded::from_bytes::<RecordingStatusPayload>(&body) {
        Ok(status) => {
            info!(call_sid=%status.call_sid, status=%status.recording_status, "recording status");
            if let Some(code) = &status.error_code {
                warn!(call_sid=%status.call_sid, error_code=%code, "recording error");
            }
            Json(json!({"status": "received"})).into_response()
        }
        Err(e) => {
            error!(error=%e, "failed to deserialize recording status payload");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "message": "Bad request"})),
            )
                .into_response()
        }
    }
}

pub async fn serve_audio(
    Path(filename): Path<String>,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    match app_state.audio.read(&filename).await {
        Ok(Some(body)) => {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("audio/mpeg"));
            (headers, body).into_response()
        }
        Ok(None) => {
            warn!(audio=%filename, "audio file not found");
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Audio file not found"})),
            )
                .into_response()
        }
        Err(e) => {
            error!(error=%e, audio=%filename, "failed to serve audio");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_recording(
    Path(call_sid): Path<String>,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    match app_state.store.load(&call_sid).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Recording not found"})),
        )
            .into_response(),
        Err(e) => {
            error!(error=%e, call_sid=%call_sid, "failed to load session");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn list_recordings(State(app_state): State<Arc<AppState>>) -> Response {
    match app_state.store.list().await {
        Ok(sessions) => Json(recordings_overview(&sessions)).into_response(),
        Err(e) => {
            error!(error=%e, "failed to list sessions");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_call_stats(State(app_state): State<Arc<AppState>>) -> Response {
    match app_state.store.list().await {
        Ok(sessions) => Json(call_stats(&sessions)).into_response(),
        Err(e) => {
            error!(error=%e, "failed to list sessions");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn health(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": now_rfc3339(),
        "services": {
            "session_store": app_state.store_kind,
            "notifications_in_flight": app_state.notifications.in_flight(),
        },
        "dashboard_user_id": app_state.config.dashboard_user_id,
    }))
}

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "Voice intake webhook service",
        "status": "active",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{engine_reply, Harness, ScriptedEngine};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    async fn post_form(h: &Harness, uri: &str, form: &str) -> (StatusCode, String, String) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::HOST, "calls.example.com")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        send(h, request).await
    }

    async fn get_path(h: &Harness, uri: &str) -> (StatusCode, String, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        send(h, request).await
    }

    async fn send(h: &Harness, request: Request<Body>) -> (StatusCode, String, String) {
        let response = router(h.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, content_type, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn first_contact_gets_greeting_twiml_with_audio() {
        let h = Harness::new(ScriptedEngine::default()).await;

        let (status, content_type, body) =
            post_form(&h, "/webhook/voice", "CallSid=CA1&From=%2B15550001111&To=%2B15550002222&CallStatus=ringing").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "application/xml");
        assert!(body.contains("<Play>https://calls.example.com/audio/voice_CA1_"));
        assert!(body.contains("<Gather"));
        let session = h.store.load("CA1").await.unwrap().unwrap();
        assert_eq!(session.from_number, "+15550001111");
        assert_eq!(session.transcript.len(), 1);
    }

    #[tokio::test]
    async fn malformed_event_still_gets_valid_twiml() {
        let h = Harness::new(ScriptedEngine::default()).await;

        let (status, _, body) = post_form(&h, "/webhook/voice", "SpeechResult=hello").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("<?xml"));
        assert!(body.contains("<Response>"));
        assert!(body.ends_with("</Response>"));
        let session = h.store.load("unknown").await.unwrap().unwrap();
        assert_eq!(session.from_number, "unknown");
        assert_eq!(session.to_number, "unknown");
    }

    #[tokio::test]
    async fn garbage_body_still_gets_valid_twiml() {
        let h = Harness::new(ScriptedEngine::default()).await;
        let (status, _, body) = post_form(&h, "/webhook/voice", "%%%&&==").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<Response>"));
    }

    #[tokio::test]
    async fn internal_failure_answers_with_apology() {
        let h = Harness::new(ScriptedEngine::default()).await;
        std::fs::remove_dir_all(&h.config.session_dir).unwrap();

        let (status, _, body) = post_form(&h, "/webhook/voice", "CallSid=CA2").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(crate::consts::APOLOGY_HOLD_MESSAGE));
        assert!(body.contains("<Hangup"));
    }

    #[tokio::test]
    async fn completed_call_hangs_up_and_reports_once() {
        let mut reply = engine_reply("Thanks, goodbye", serde_json::json!({"name": "Ann"}));
        reply.should_end_call = true;
        let h = Harness::new(ScriptedEngine::with_replies(vec![reply])).await;

        let (_, _, body) =
            post_form(&h, "/webhook/voice", "CallSid=CA3&From=%2B1555&SpeechResult=bye").await;
        assert!(!body.contains("<Gather"));
        assert!(body.contains("<Hangup"));

        let (status, _, ack) = post_form(
            &h,
            "/webhook/recording",
            "CallSid=CA3&RecordingUrl=https%3A%2F%2Frec.example%2FRE3&RecordingDuration=31&RecordingSid=RE3",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(ack.contains("Recording processed"));

        h.notifications.drain().await;
        assert_eq!(h.sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recording_status_is_acknowledged() {
        let h = Harness::new(ScriptedEngine::default()).await;
        let (status, _, body) = post_form(
            &h,
            "/webhook/recording-status",
            "CallSid=CA4&RecordingStatus=failed&ErrorCode=12345",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("received"));
        assert!(h.store.load("CA4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recording_without_required_fields_is_rejected() {
        let h = Harness::new(ScriptedEngine::default()).await;
        let (status, _, _) = post_form(&h, "/webhook/recording", "CallSid=CA5").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn audio_artifacts_are_served() {
        let h = Harness::new(ScriptedEngine::default()).await;
        let (_, _, body) = post_form(&h, "/webhook/voice", "CallSid=CA6").await;
        let start = body.find("/audio/").unwrap() + "/audio/".len();
        let end = body[start..].find("</Play>").unwrap() + start;
        let name = &body[start..end];

        let (status, content_type, bytes) = get_path(&h, &format!("/audio/{name}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "audio/mpeg");
        assert_eq!(bytes, "ID3-fake-mp3");
        assert_eq!(h.speech.calls.load(Ordering::SeqCst), 1);

        let (status, _, _) = get_path(&h, "/audio/voice_nope.mp3").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn read_endpoints_report_sessions() {
        let h = Harness::new(ScriptedEngine::default()).await;
        post_form(&h, "/webhook/voice", "CallSid=CA7&From=%2B1555").await;

        let (status, _, body) = get_path(&h, "/calls/recordings/CA7").await;
        assert_eq!(status, StatusCode::OK);
        let session: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(session["call_sid"], "CA7");

        let (status, _, _) = get_path(&h, "/calls/recordings/CA-missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, _, body) = get_path(&h, "/calls/all-recordings").await;
        let overview: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(overview["total_calls"], 1);

        let (_, _, body) = get_path(&h, "/calls/stats").await;
        let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(stats["total_calls"], 1);
        assert_eq!(stats["completed_calls"], 0);

        let (status, _, body) = get_path(&h, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("healthy"));
    }
}
