use crate::notification::title_case;
use crate::session_types::{lead_keys, CallSession, LeadInfo};

use serde::Serialize;
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Serialize, Debug)]
pub struct RecordingSummary {
    pub call_sid: String,
    pub from_number: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub conversation_exchanges: usize,
    pub lead_score: String,
    pub contact_captured: bool,
    pub call_completed: bool,
    pub business_type: String,
    pub product_interest: String,
    pub recording_url: Option<String>,
    pub summary: String,
}

#[derive(Serialize, Debug)]
pub struct RecordingsOverview {
    pub recordings: Vec<RecordingSummary>,
    pub total_calls: usize,
    pub hot_leads: usize,
    pub completed_calls: usize,
    pub contact_capture_rate: String,
    pub completion_rate: String,
}

#[derive(Serialize, Debug)]
pub struct CallStats {
    pub total_calls: usize,
    pub completed_calls: usize,
    pub lead_scores: BTreeMap<String, usize>,
    pub business_types: BTreeMap<String, usize>,
    pub contact_capture_rate: String,
    pub call_completion_rate: String,
    pub average_conversation_length: String,
}

fn lead_of(session: &CallSession) -> &LeadInfo {
    session
        .final_lead_info
        .as_ref()
        .unwrap_or(&session.lead_info)
}

fn contact_captured(lead: &LeadInfo) -> bool {
    lead.contains_key(lead_keys::NAME) || lead.contains_key(lead_keys::PHONE)
}

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}

fn percent(part: usize, total: usize) -> String {
    if total == 0 {
        return "0%".to_string();
    }
    format!("{:.1}%", part as f64 / total as f64 * 100.0)
}

pub fn recordings_overview(sessions: &[CallSession]) -> RecordingsOverview {
    let mut ordered: Vec<&CallSession> = sessions.iter().collect();
    ordered.sort_by(|a, b| b.start_time.cmp(&a.start_time));

    let recordings: Vec<RecordingSummary> = ordered
        .into_iter()
        .map(|session| {
            let lead = lead_of(session);
            let lead_score = lead
                .get(lead_keys::LEAD_SCORE)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            let business = lead.get(lead_keys::BUSINESS_TYPE).cloned();
            let completed = session.is_completed();
            RecordingSummary {
                call_sid: session.call_sid.clone(),
                from_number: session.from_number.clone(),
                start_time: rfc3339(session.start_time),
                end_time: session.end_time.map(rfc3339),
                conversation_exchanges: session.transcript.len(),
                summary: format!(
                    "{} lead - {} - {}",
                    title_case(&lead_score),
                    business.as_deref().unwrap_or("Unknown business"),
                    if completed { "Complete" } else { "Incomplete" }
                ),
                lead_score,
                contact_captured: contact_captured(lead),
                call_completed: completed,
                business_type: business.unwrap_or_else(|| "unknown".to_string()),
                product_interest: lead
                    .get(lead_keys::PRODUCT_CATEGORY)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                recording_url: session.recording_url.clone(),
            }
        })
        .collect();

    let total = recordings.len();
    let hot_leads = recordings.iter().filter(|r| r.lead_score == "hot").count();
    let completed_calls = recordings.iter().filter(|r| r.call_completed).count();
    let captured = recordings.iter().filter(|r| r.contact_captured).count();
    RecordingsOverview {
        total_calls: total,
        hot_leads,
        completed_calls,
        contact_capture_rate: percent(captured, total),
        completion_rate: percent(completed_calls, total),
        recordings,
    }
}

pub fn call_stats(sessions: &[CallSession]) -> CallStats {
    let mut lead_scores: BTreeMap<String, usize> = ["hot", "warm", "cold"]
        .into_iter()
        .map(|s| (s.to_string(), 0))
        .collect();
    let mut business_types = BTreeMap::new();
    let mut captured = 0;
    let mut completed = 0;
    let mut turns = 0;

    for session in sessions {
        let lead = lead_of(session);
        let score = lead
            .get(lead_keys::LEAD_SCORE)
            .cloned()
            .unwrap_or_else(|| "cold".to_string());
        *lead_scores.entry(score).or_insert(0) += 1;
        let business = lead
            .get(lead_keys::BUSINESS_TYPE)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        *business_types.entry(business).or_insert(0) += 1;
        if contact_captured(lead) {
            captured += 1;
        }
        if session.is_completed() {
            completed += 1;
        }
        turns += session.transcript.len();
    }

    let total = sessions.len();
    let average = if total == 0 {
        0.0
    } else {
        turns as f64 / total as f64
    };
    CallStats {
        total_calls: total,
        completed_calls: completed,
        lead_scores,
        business_types,
        contact_capture_rate: percent(captured, total),
        call_completion_rate: percent(completed, total),
        average_conversation_length: format!("{average:.1} exchanges"),
    }
}
