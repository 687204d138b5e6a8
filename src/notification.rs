use crate::error::AppError;
use crate::session_types::{lead_keys, CallSession, Turn, UNKNOWN};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, info, warn};

const SECONDS_PER_TURN_ESTIMATE: i64 = 30;

/// Body posted to the tracking dashboard for a finished call.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallReport {
    pub user_id: i64,
    pub phone_number: String,
    pub contact_name: String,
    pub duration: i64,
    pub status: String,
    pub summary: String,
    pub notes: String,
    pub transcript: String,
    pub direction: String,
    pub call_id: String,
    pub recording_url: Option<String>,
}

impl CallReport {
    pub fn from_session(session: &CallSession, user_id: i64) -> Self {
        let lead = session.final_lead_info.as_ref().unwrap_or(&session.lead_info);
        let field = |key: &str, default: &str| {
            lead.get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };
        let name = field(lead_keys::NAME, "Unknown caller");
        let business_type = field(lead_keys::BUSINESS_TYPE, "business");
        let product_interest = field(lead_keys::PRODUCT_CATEGORY, "promotional items");
        let lead_score = field(lead_keys::LEAD_SCORE, "warm");

        Self {
            user_id,
            phone_number: if session.from_number.is_empty() {
                UNKNOWN.to_string()
            } else {
                session.from_number.clone()
            },
            summary: format!(
                "{} lead - {name} from {business_type} interested in {product_interest}",
                title_case(&lead_score)
            ),
            notes: format!(
                "Lead Score: {lead_score} | Business: {business_type} | Interest: {product_interest}"
            ),
            contact_name: name,
            duration: call_duration_secs(&session.transcript),
            status: if session.is_completed() {
                "completed"
            } else {
                "missed"
            }
            .to_string(),
            transcript: transcript_text(&session.transcript),
            direction: "inbound".to_string(),
            call_id: session.call_sid.clone(),
            recording_url: session.recording_url.clone(),
        }
    }
}

pub fn transcript_text(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.speaker, t.text))
        .collect::<Vec<String>>()
        .join("\n")
}

/// Seconds between the first and last turn, or a per-turn estimate when either timestamp is
/// unreadable.
pub fn call_duration_secs(turns: &[Turn]) -> i64 {
    if turns.len() < 2 {
        return 0;
    }
    let parse = |t: &Turn| OffsetDateTime::parse(&t.timestamp, &Rfc3339).ok();
    match (parse(&turns[0]), parse(&turns[turns.len() - 1])) {
        (Some(start), Some(end)) => (end - start).whole_seconds().max(0),
        _ => SECONDS_PER_TURN_ESTIMATE * turns.len() as i64,
    }
}

pub fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// One delivery attempt of a report.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn post(&self, report: &CallReport) -> Result<(), AppError>;
}

pub struct HttpReportSink {
    pub http_client: reqwest::Client,
    pub url: String,
    pub timeout: Duration,
}

#[async_trait]
impl ReportSink for HttpReportSink {
    async fn post(&self, report: &CallReport) -> Result<(), AppError> {
        let resp = self
            .http_client
            .post(&self.url)
            .timeout(self.timeout)
            .json(report)
            .send()
            .await
            .map_err(|e| AppError::Notification(format!("transport: {e}")))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AppError::Notification(format!("dashboard answered {status}")))
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

/// Reports finished calls to the dashboard, at most once per session.
pub struct NotificationDispatcher {
    sink: Arc<dyn ReportSink>,
    policy: RetryPolicy,
    user_id: i64,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn ReportSink>, policy: RetryPolicy, user_id: i64) -> Self {
        Self {
            sink,
            policy,
            user_id,
        }
    }

    /// Claims the session's one notification.  `notified` flips before any delivery is tried, so
    /// the caller must persist the session before handing the report to [`Self::deliver`].
    /// Returns `None` if the session was already claimed.
    pub fn maybe_notify(&self, session: &mut CallSession) -> Option<CallReport> {
        if session.notified {
            return None;
        }
        session.notified = true;
        Some(CallReport::from_session(session, self.user_id))
    }

    /// Posts `report`, retrying on failure.  Returns the number of attempts used.  After the last
    /// attempt the report is dropped; there is no outbox.
    pub async fn deliver(&self, report: &CallReport) -> Result<u32, AppError> {
        let attempts = self.policy.attempts.max(1);
        let mut last_error = AppError::Notification("no attempts made".to_string());
        for attempt in 1..=attempts {
            match self.sink.post(report).await {
                Ok(()) => {
                    info!(call_sid=%report.call_id, attempt, summary=%report.summary, "call logged on dashboard");
                    return Ok(attempt);
                }
                Err(e) => {
                    warn!(call_sid=%report.call_id, attempt, error=%e, "dashboard delivery attempt failed");
                    last_error = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }
        error!(call_sid=%report.call_id, attempts, "giving up on dashboard delivery");
        Err(last_error)
    }
}
