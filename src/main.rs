mod audio;
mod config;
mod dialogue;
mod error;
mod handlers;
mod notification;
mod openai_types;
mod orchestrator;
mod response;
mod session_store;
mod session_types;
mod stats;
mod tasks;
#[cfg(test)]
mod test_support;
mod twilio_types;
mod types;

use crate::audio::OpenAiSpeech;
use crate::config::Config;
use crate::dialogue::OpenAiDialogueEngine;
use crate::error::{handle_error, AppError};
use crate::notification::HttpReportSink;
use crate::session_store::{FileSessionStore, PgSessionStore, SessionStore};
use crate::types::AppState;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;

pub mod consts {
    pub const APP_GREETING: &str =
        "Hi! Thanks for calling. What promotional items can I help you with today?";
    pub const ENGINE_FALLBACK_MESSAGE: &str =
        "Sorry, I missed part of that. Could you tell me a bit more about what you are looking for?";
    pub const POST_COMPLETION_MESSAGE: &str =
        "Thanks again for calling. One of our specialists will be in touch soon. Goodbye!";
    pub const APOLOGY_HOLD_MESSAGE: &str =
        "Hello! Thanks for calling. Please hold while we connect you.";
    pub const REPROMPT_MESSAGE: &str = "Sorry, I did not catch that. Could you repeat?";
    pub const GOODBYE_MESSAGE: &str = "Thanks for calling. Have a great day!";
    pub const SAY_VOICE: &str = "Polly.Ruth-Neural";
    pub const GATHER_LANGUAGE: &str = "en-US";
    pub const VOICE_WEBHOOK_PATH: &str = "/webhook/voice";
    pub const AUDIO_ROUTE_PREFIX: &str = "/audio";
    pub const ENGINE_SYSTEM_PROMPT: &str = r#"You are a friendly phone receptionist for a promotional products company.
Keep every reply short enough to be spoken aloud in one breath.
Learn, one question at a time: the caller's name, a callback phone number, their type of business,
the product category they want (pens, apparel, mugs, bags, ...), rough quantity and timeline.
Score the lead as hot, warm or cold.
Once you have the caller's name and what they need, thank them and end the call.

Answer with a single JSON object and nothing else:
{
  "message": "<what to say next>",
  "lead_info": {"name": "", "phone": "", "business_type": "", "product_category": "", "lead_score": ""},
  "should_end_call": false,
  "next_action": "continue",
  "confidence": 0.9
}
Leave unknown lead_info fields empty. Use "end_call" as next_action when ending the call."#;
}

async fn open_store(config: &Config) -> Result<(Arc<dyn SessionStore>, &'static str), AppError> {
    match &config.database_url {
        Some(url) => Ok((Arc::new(PgSessionStore::connect(url).await?), "postgres")),
        None => Ok((
            Arc::new(FileSessionStore::open(&config.session_dir).await?),
            "file",
        )),
    }
}

async fn build_state(config: Config) -> Result<AppState, AppError> {
    let (store, store_kind) = open_store(&config).await?;
    let http_client = reqwest::Client::new();
    let engine = Arc::new(OpenAiDialogueEngine {
        http_client: http_client.clone(),
        api_key: config.openai_api_key.clone(),
        model: config.chat_model.clone(),
    });
    let speech = Arc::new(OpenAiSpeech {
        http_client: http_client.clone(),
        api_key: config.openai_api_key.clone(),
        model: config.tts_model.clone(),
        voice: config.tts_voice.clone(),
    });
    let sink = Arc::new(HttpReportSink {
        http_client,
        url: config.dashboard_url.clone(),
        timeout: config.notify_timeout,
    });
    AppState::assemble(config, store, store_kind, engine, speech, sink).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        handle_error(e);
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("voice_intake", tracing_subscriber::filter::LevelFilter::DEBUG),
        ]));
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {e}");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            handle_error(e);
            std::process::exit(1);
        }
    };
    let port = config.port;

    let app_state = match build_state(config).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            handle_error(e);
            std::process::exit(1);
        }
    };
    info!(
        store = app_state.store_kind,
        dashboard = %app_state.config.dashboard_url,
        "voice intake ready"
    );

    let app = handlers::router(app_state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "listening");
    if let Err(e) = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        handle_error(e);
    }

    app_state.notifications.shutdown().await;
}
