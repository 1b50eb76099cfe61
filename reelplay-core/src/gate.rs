//! Activation gate: what a player must do when activation or unlock changes.
//!
//! Decision table, first match wins:
//!
//! | activation | unlocked | autoplay | muted      | action             |
//! |------------|----------|----------|------------|--------------------|
//! | false      | any      | any      | true       | pause-if-playing   |
//! | true       | false    | true     | true       | play               |
//! | true       | true     | any      | false      | restart-and-play   |
//! | true       | any      | false    | !unlocked  | none               |
//!
//! Deactivation keeps the current position so a quickly revisited slide does
//! not re-buffer. Unlocking restarts from zero: the unlock gesture is the first
//! moment the viewer hears the content.

use serde::Serialize;

use crate::player::PlayerSession;

/// Sink command the controller must carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateAction {
    PauseIfPlaying,
    Play,
    RestartAndPlay,
    None,
}

impl std::fmt::Display for GateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GateAction::PauseIfPlaying => "pause-if-playing",
            GateAction::Play => "play",
            GateAction::RestartAndPlay => "restart-and-play",
            GateAction::None => "none",
        };
        f.write_str(name)
    }
}

/// Muted flag and action to apply to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlayerSessionPatch {
    pub muted: bool,
    pub action: GateAction,
}

/// Stateless decision table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationGate;

impl ActivationGate {
    /// Evaluates the table for `session` under the given axes.
    pub fn apply(session: &PlayerSession, activation: bool, unlocked: bool) -> PlayerSessionPatch {
        Self::decide(activation, unlocked, session.config.autoplay)
    }

    /// Same table with the autoplay flag passed directly.
    pub fn decide(activation: bool, unlocked: bool, autoplay: bool) -> PlayerSessionPatch {
        let (muted, action) = match (activation, unlocked, autoplay) {
            (false, _, _) => (true, GateAction::PauseIfPlaying),
            (true, false, true) => (true, GateAction::Play),
            (true, true, _) => (false, GateAction::RestartAndPlay),
            (true, unlocked, false) => (!unlocked, GateAction::None),
        };
        PlayerSessionPatch { muted, action }
    }
}
