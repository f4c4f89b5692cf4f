//! Presence scenarios the harness knows how to run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// Every visible persona sees every other visible persona
    MutualVisibility,

    /// Compatibility hints surface shared tags
    SharedTags,

    /// Hiding removes a persona from all rosters; showing restores it
    VisibilityToggle,

    /// Reconnect keeps the last explicit visibility
    ReconnectRestoresVisibility,

    /// A second chat is refused while one is active
    OneChatAtATime,

    /// Two concurrent requests to one target: first writer wins
    ConcurrentChatRace,

    /// One persona fails to start; siblings run and are cleaned up
    IsolatedFailure,

    /// Panic ends the chat and hides the persona
    PanicExit,

    /// Full boot/onboarding walkthrough feeding UX telemetry
    UxWalkthrough,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::MutualVisibility,
            ScenarioId::SharedTags,
            ScenarioId::VisibilityToggle,
            ScenarioId::ReconnectRestoresVisibility,
            ScenarioId::OneChatAtATime,
            ScenarioId::ConcurrentChatRace,
            ScenarioId::IsolatedFailure,
            ScenarioId::PanicExit,
            ScenarioId::UxWalkthrough,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::MutualVisibility => "mutual_visibility",
            ScenarioId::SharedTags => "shared_tags",
            ScenarioId::VisibilityToggle => "visibility_toggle",
            ScenarioId::ReconnectRestoresVisibility => "reconnect_restores_visibility",
            ScenarioId::OneChatAtATime => "one_chat_at_a_time",
            ScenarioId::ConcurrentChatRace => "concurrent_chat_race",
            ScenarioId::IsolatedFailure => "isolated_failure",
            ScenarioId::PanicExit => "panic_exit",
            ScenarioId::UxWalkthrough => "ux_walkthrough",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::MutualVisibility => "All visible personas appear on each other's radar",
            ScenarioId::SharedTags => "Pairs sharing a tag get a non-empty compatibility hint",
            ScenarioId::VisibilityToggle => "Hide one persona, check every roster, then show again",
            ScenarioId::ReconnectRestoresVisibility => {
                "Hide, disconnect, reconnect: persona stays hidden"
            }
            ScenarioId::OneChatAtATime => "Second chat request and busy target are both refused",
            ScenarioId::ConcurrentChatRace => "Two personas race to chat with the same target",
            ScenarioId::IsolatedFailure => "Bad token for one persona; the rest start and tear down",
            ScenarioId::PanicExit => "Panic mid-chat ends the chat and hides the persona",
            ScenarioId::UxWalkthrough => "Boot, onboarding, radar and profile with UX telemetry",
        }
    }

    /// Built-in venue used when no script is given.
    pub fn default_venue(&self) -> &'static str {
        match self {
            ScenarioId::MutualVisibility
            | ScenarioId::SharedTags
            | ScenarioId::VisibilityToggle
            | ScenarioId::UxWalkthrough => "campus-library",
            ScenarioId::ReconnectRestoresVisibility => "coworking-downtown",
            ScenarioId::OneChatAtATime
            | ScenarioId::ConcurrentChatRace
            | ScenarioId::IsolatedFailure => "chat-performance-test",
            ScenarioId::PanicExit => "gallery-opening",
        }
    }

    /// Personas the scenario needs to say anything meaningful.
    pub fn min_personas(&self) -> usize {
        match self {
            ScenarioId::UxWalkthrough => 1,
            ScenarioId::OneChatAtATime
            | ScenarioId::ConcurrentChatRace
            | ScenarioId::IsolatedFailure => 3,
            _ => 2,
        }
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('-', "_");
        ScenarioId::all()
            .into_iter()
            .find(|id| id.name() == normalized)
            .ok_or_else(|| format!("Unknown scenario: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>().unwrap(), id);
        }
        assert_eq!("panic-exit".parse::<ScenarioId>().unwrap(), ScenarioId::PanicExit);
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_default_venues_satisfy_minimums() {
        for id in ScenarioId::all() {
            let script = fixtures::load_fixture(id.default_venue()).unwrap();
            assert!(script.personas.len() >= id.min_personas(), "{}", id);
        }
    }
}
