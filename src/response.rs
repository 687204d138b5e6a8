use crate::consts::{
    APOLOGY_HOLD_MESSAGE, GATHER_LANGUAGE, GOODBYE_MESSAGE, REPROMPT_MESSAGE, SAY_VOICE,
    VOICE_WEBHOOK_PATH,
};
use crate::twilio_types::{
    wrap_twiml, GatherAction, HangupAction, PlayAction, Response, ResponseAction, SayAction,
};

const FIRST_GATHER_TIMEOUT_SECS: u16 = 5;
const REPROMPT_GATHER_TIMEOUT_SECS: u16 = 6;

/// TwiML for one orchestrator decision.
///
/// A finished call speaks its message and hangs up.  A continuing call speaks, listens, re-prompts
/// once, listens once more, then says goodbye and hangs up; a caller who answers either gather is
/// posted back to the voice webhook before the goodbye is reached.
pub fn render(completed: bool, message: &str, audio_url: Option<&str>) -> String {
    let mut actions = vec![speak(message, audio_url)];
    if !completed {
        actions.push(gather(FIRST_GATHER_TIMEOUT_SECS));
        actions.push(say(REPROMPT_MESSAGE));
        actions.push(gather(REPROMPT_GATHER_TIMEOUT_SECS));
        actions.push(say(GOODBYE_MESSAGE));
    }
    actions.push(ResponseAction::Hangup(HangupAction {}));
    to_twiml(actions)
}

/// Last-resort answer when handling the event failed outright.
pub fn apology() -> String {
    to_twiml(vec![
        say(APOLOGY_HOLD_MESSAGE),
        ResponseAction::Hangup(HangupAction {}),
    ])
}

fn to_twiml(actions: Vec<ResponseAction>) -> String {
    wrap_twiml(xmlserde::xml_serialize(Response { actions }))
}

fn speak(message: &str, audio_url: Option<&str>) -> ResponseAction {
    match audio_url {
        Some(url) => ResponseAction::Play(PlayAction {
            url: url.to_string(),
            ..Default::default()
        }),
        None => say(message),
    }
}

fn say(text: &str) -> ResponseAction {
    ResponseAction::Say(SayAction {
        text: text.to_string(),
        voice: Some(SAY_VOICE.to_string()),
        ..Default::default()
    })
}

fn gather(timeout: u16) -> ResponseAction {
    ResponseAction::Gather(GatherAction {
        input: "speech".to_string(),
        action: VOICE_WEBHOOK_PATH.to_string(),
        speech_timeout: Some("auto".to_string()),
        timeout: Some(timeout),
        language: Some(GATHER_LANGUAGE.to_string()),
    })
}
