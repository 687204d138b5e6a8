use crate::consts::ENGINE_SYSTEM_PROMPT;
use crate::error::AppError;
use crate::openai_types::{OpenAIBatchResponse, OpenAIMessage, OpenAIPayload, OpenAIResponseFormat};
use crate::session_types::{LeadInfo, Speaker, Turn, CONTINUE, END_CALL};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};

/// What the engine sees for one caller utterance.
pub struct DialogueContext<'a> {
    pub call_sid: &'a str,
    pub speech: &'a str,
    pub lead_info: &'a LeadInfo,
    /// Full transcript, ending with the caller's utterance.
    pub transcript: &'a [Turn],
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EngineReply {
    pub message: String,
    #[serde(default)]
    pub lead_info: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub should_end_call: bool,
    #[serde(default = "default_next_action")]
    pub next_action: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_next_action() -> String {
    CONTINUE.to_string()
}

fn default_confidence() -> f32 {
    0.9
}

impl EngineReply {
    pub fn requests_end(&self) -> bool {
        self.should_end_call || self.next_action == END_CALL
    }
}

/// Produces the next thing to say and whatever lead fields it could pick out of the caller's
/// speech.
#[async_trait]
pub trait DialogueEngine: Send + Sync {
    async fn respond(&self, ctx: DialogueContext<'_>) -> Result<EngineReply, AppError>;
}

pub struct OpenAiDialogueEngine {
    pub http_client: reqwest::Client,
    pub api_key: String,
    pub model: String,
}

impl OpenAiDialogueEngine {
    fn prompt(ctx: &DialogueContext<'_>) -> Vec<OpenAIMessage> {
        let known = serde_json::to_string(ctx.lead_info).unwrap_or_else(|_| "{}".to_string());
        let mut messages = vec![
            OpenAIMessage::system(ENGINE_SYSTEM_PROMPT),
            OpenAIMessage::system(format!("Lead information captured so far: {known}")),
        ];
        for turn in ctx.transcript {
            if turn.text.is_empty() {
                continue;
            }
            messages.push(match turn.speaker {
                Speaker::Customer => OpenAIMessage::user(turn.text.as_str()),
                Speaker::System => OpenAIMessage::assistant(turn.text.as_str()),
            });
        }
        messages
    }
}

#[async_trait]
impl DialogueEngine for OpenAiDialogueEngine {
    async fn respond(&self, ctx: DialogueContext<'_>) -> Result<EngineReply, AppError> {
        let url = "https://api.openai.com/v1/chat/completions";
        let payload = OpenAIPayload {
            model: self.model.clone(),
            messages: Self::prompt(&ctx),
            max_tokens: Some(300),
            temperature: Some(0.4),
            response_format: Some(OpenAIResponseFormat {
                kind: "json_object".to_string(),
            }),
        };
        debug!(call_sid=%ctx.call_sid, speech=%ctx.speech, "asking engine for a reply");
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
                error!(error=%e, call_sid=%ctx.call_sid, "failed to send request to OpenAI");
                AppError::Engine(format!("request: {e}"))
            })?;
        let resp = resp.json::<OpenAIBatchResponse>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize openai chat response");
            AppError::Engine(format!("response: {e}"))
        })?;
        let content = resp
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| AppError::Engine("no choices in response".to_string()))?;
        debug!(call_sid=%ctx.call_sid, content=%content, "engine reply");
        parse_reply(content)
    }
}

/// Models occasionally wrap the object in a code fence; tolerate that.
pub fn parse_reply(content: &str) -> Result<EngineReply, AppError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);
    let reply: EngineReply = serde_json::from_str(body.trim()).map_err(|e| {
        error!(error=%e, "engine reply was not the expected JSON object");
        AppError::Engine(format!("reply: {e}"))
    })?;
    if reply.message.trim().is_empty() {
        return Err(AppError::Engine("empty reply message".to_string()));
    }
    Ok(reply)
}
