//! What to do when a running pattern starts failing.

use super::state::EngineState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Leave playback alone.
    None,
    /// Stop playback.
    StopPlayback,
}

/// Decides the reaction to an engine state transition.
///
/// Only the transition from "playing without error" to "error" matters. While
/// an AI-driven update is in flight the broken pattern keeps running so a human
/// can be told and decide; otherwise playback stops.
pub fn decide(previous: &EngineState, next: &EngineState, ai_update_in_flight: bool) -> PolicyAction {
    let newly_failing = previous.is_playing_cleanly() && next.has_error();
    if newly_failing && !ai_update_in_flight {
        PolicyAction::StopPlayback
    } else {
        PolicyAction::None
    }
}
