use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const UNKNOWN: &str = "unknown";
pub const END_CALL: &str = "end_call";
pub const CONTINUE: &str = "continue";

pub mod lead_keys {
    pub const NAME: &str = "name";
    pub const PHONE: &str = "phone";
    pub const BUSINESS_TYPE: &str = "business_type";
    pub const PRODUCT_CATEGORY: &str = "product_category";
    pub const LEAD_SCORE: &str = "lead_score";
}

/// Customer attributes collected over a call.  Only non-blank values are ever stored.
pub type LeadInfo = BTreeMap<String, String>;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    InProgress,
    Completed,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    System,
    Customer,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Speaker::System => write!(f, "Agent"),
            Speaker::Customer => write!(f, "Customer"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum TurnType {
    Greeting,
    CustomerInput,
    AiResponse,
}

/// Orchestrator bookkeeping attached to system replies.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct ReplyMeta {
    pub lead_info_extracted: LeadInfo,
    pub confidence: f32,
    pub next_action: String,
    pub should_end_call: bool,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Turn {
    /// RFC 3339 text.  Kept as text so that records with damaged timestamps still load.
    pub timestamp: String,
    pub speaker: Speaker,
    pub text: String,
    pub turn_type: TurnType,
    #[serde(flatten)]
    pub reply: Option<ReplyMeta>,
}

impl Turn {
    pub fn greeting(text: &str) -> Self {
        Self {
            timestamp: now_rfc3339(),
            speaker: Speaker::System,
            text: text.to_string(),
            turn_type: TurnType::Greeting,
            reply: None,
        }
    }

    pub fn customer(text: &str) -> Self {
        Self {
            timestamp: now_rfc3339(),
            speaker: Speaker::Customer,
            text: text.to_string(),
            turn_type: TurnType::CustomerInput,
            reply: None,
        }
    }

    pub fn reply(text: &str, meta: ReplyMeta) -> Self {
        Self {
            timestamp: now_rfc3339(),
            speaker: Speaker::System,
            text: text.to_string(),
            turn_type: TurnType::AiResponse,
            reply: Some(meta),
        }
    }
}

/// The persisted record of one phone call.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct CallSession {
    pub call_sid: String,
    pub from_number: String,
    pub to_number: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub transcript: Vec<Turn>,
    #[serde(default)]
    pub lead_info: LeadInfo,
    #[serde(default)]
    pub final_lead_info: Option<LeadInfo>,
    pub status: CallStatus,
    #[serde(default)]
    pub notified: bool,
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub recording_sid: Option<String>,
    #[serde(default)]
    pub recording_duration: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_updated: Option<OffsetDateTime>,
}

impl CallSession {
    pub fn new(call_sid: &str, from_number: &str, to_number: &str) -> Self {
        Self {
            call_sid: call_sid.to_string(),
            from_number: from_number.to_string(),
            to_number: to_number.to_string(),
            start_time: OffsetDateTime::now_utc(),
            end_time: None,
            transcript: vec![],
            lead_info: LeadInfo::new(),
            final_lead_info: None,
            status: CallStatus::InProgress,
            notified: false,
            recording_url: None,
            recording_sid: None,
            recording_duration: None,
            last_updated: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == CallStatus::Completed
    }

    /// Move to `Completed`.  The end time is stamped only the first time through, and there is
    /// no way back to `InProgress`.
    pub fn complete(&mut self) {
        self.status = CallStatus::Completed;
        if self.end_time.is_none() {
            self.end_time = Some(OffsetDateTime::now_utc());
        }
        self.final_lead_info = Some(self.lead_info.clone());
    }

    /// Fold an extracted delta into `lead_info`, returning the part of the delta that was usable.
    pub fn merge_lead_info(
        &mut self,
        delta: &serde_json::Map<String, serde_json::Value>,
    ) -> LeadInfo {
        let mut applied = LeadInfo::new();
        for (key, value) in delta {
            if let Some(value) = lead_value(value) {
                self.lead_info.insert(key.clone(), value.clone());
                applied.insert(key.clone(), value);
            }
        }
        applied
    }

    pub fn lead(&self, key: &str) -> Option<&str> {
        self.lead_info.get(key).map(String::as_str)
    }

    /// Enough has been captured to hand the caller to a specialist.
    pub fn has_qualifying_lead(&self) -> bool {
        let has_contact =
            self.lead(lead_keys::NAME).is_some() && self.lead(lead_keys::PHONE).is_some();
        let has_project = self.lead(lead_keys::BUSINESS_TYPE).is_some()
            || self.lead(lead_keys::PRODUCT_CATEGORY).is_some();
        has_contact && has_project
    }
}

fn lead_value(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn merge_never_blanks_a_known_field() {
        let mut session = CallSession::new("CA1", "+15550001111", "+15550002222");
        session.merge_lead_info(&delta(json!({"name": "Mary", "phone": "555-123-4567"})));

        let applied = session.merge_lead_info(&delta(json!({
            "name": "",
            "phone": null,
            "business_type": "  ",
            "lead_score": "hot",
        })));

        assert_eq!(session.lead("name"), Some("Mary"));
        assert_eq!(session.lead("phone"), Some("555-123-4567"));
        assert_eq!(session.lead("business_type"), None);
        assert_eq!(session.lead("lead_score"), Some("hot"));
        assert_eq!(applied.len(), 1);
    }

    #[test]
    fn merge_is_last_non_null_wins() {
        let mut session = CallSession::new("CA1", UNKNOWN, UNKNOWN);
        session.merge_lead_info(&delta(json!({"business_type": "cafe"})));
        session.merge_lead_info(&delta(json!({"business_type": "bakery", "quantity": 250})));

        assert_eq!(session.lead("business_type"), Some("bakery"));
        assert_eq!(session.lead("quantity"), Some("250"));
    }

    #[test]
    fn complete_stamps_end_time_once() {
        let mut session = CallSession::new("CA1", UNKNOWN, UNKNOWN);
        session.complete();
        let first_end = session.end_time;
        assert!(first_end.is_some());

        session.lead_info.insert("name".into(), "Mary".into());
        session.complete();

        assert_eq!(session.end_time, first_end);
        assert_eq!(session.status, CallStatus::Completed);
        assert_eq!(
            session.final_lead_info.as_ref().and_then(|l| l.get("name")),
            Some(&"Mary".to_string())
        );
    }

    #[test]
    fn qualifying_lead_needs_contact_and_project() {
        let mut session = CallSession::new("CA1", UNKNOWN, UNKNOWN);
        session.merge_lead_info(&delta(json!({"name": "Mary", "business_type": "bakery"})));
        assert!(!session.has_qualifying_lead());

        session.merge_lead_info(&delta(json!({"phone": "555-123-4567"})));
        assert!(session.has_qualifying_lead());
    }

    #[test]
    fn reply_meta_is_flattened_into_the_turn() {
        let turn = Turn::reply(
            "Thanks!",
            ReplyMeta {
                lead_info_extracted: LeadInfo::new(),
                confidence: 0.5,
                next_action: END_CALL.into(),
                should_end_call: true,
            },
        );
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["turn_type"], "ai_response");
        assert_eq!(value["speaker"], "system");
        assert_eq!(value["next_action"], "end_call");

        let back: Turn = serde_json::from_value(value).unwrap();
        assert_eq!(back, turn);
    }

    #[test]
    fn plain_turns_carry_no_reply_meta() {
        let value = serde_json::to_value(Turn::customer("hello")).unwrap();
        assert!(value.get("confidence").is_none());
        let back: Turn = serde_json::from_value(value).unwrap();
        assert!(back.reply.is_none());
    }
}
