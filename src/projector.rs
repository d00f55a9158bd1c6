//! Projects the inbound event stream into the observable conversation state.

use crate::event;
use serde::Serialize;

/// What the remote party is currently perceived to be doing.
///
/// Exactly one value at any instant. Starts as `Idle` when the event
/// channel opens and is reset to `Idle` when the session closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    Listening,
    Responding,
}

/// The pure transition function, applied as a fold over inbound event types.
///
/// Total over every (state, type) pair; unrecognized types leave the state
/// unchanged. `speech_started` and the response-delta types force their
/// target state regardless of the current one: a `speech_started` arriving
/// mid-response deliberately cuts the "responding" indication. That policy
/// matches the remote endpoint's observed interruption behavior and should
/// only change if a defect is confirmed against its documented ordering.
pub fn transition(current: ConversationState, event_type: &str) -> ConversationState {
    match event_type {
        event::SPEECH_STARTED => ConversationState::Listening,
        event::SPEECH_STOPPED if current == ConversationState::Listening => {
            ConversationState::Idle
        }
        event::RESPONSE_AUDIO_DELTA | event::RESPONSE_TRANSCRIPT_DELTA => {
            ConversationState::Responding
        }
        event::RESPONSE_DONE => ConversationState::Idle,
        _ => current,
    }
}
