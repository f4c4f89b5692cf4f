//! Scenario model: the fixed cast of personas for one test scenario.
//!
//! Scripts are parsed and validated in one step. A script that loads is
//! guaranteed to have unique, non-blank session ids, non-empty handles and
//! well-formed locations, so orchestration never trips over a malformed
//! document halfway through.

use presence_env::{GeoPoint, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating a presence script.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed scenario document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate sessionId '{0}'")]
    DuplicateSessionId(SessionId),

    #[error("Invalid persona '{session_id}': {reason}")]
    InvalidPersona { session_id: SessionId, reason: String },

    #[error("Scenario rejected: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ScenarioError>),

    #[error("Unknown venue '{venue}'. Available venues: {available}")]
    UnknownVenue { venue: String, available: String },
}

/// Mood label a persona advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Vibe {
    Thinking,
    Intros,
    Banter,
    /// Open to anything: compatible with every other vibe.
    Surprise,
    KillingTime,
}

impl Vibe {
    pub fn is_open(&self) -> bool {
        matches!(self, Vibe::Surprise)
    }

    /// Vibes match when equal, or when either side is open to anything.
    pub fn compatible_with(&self, other: &Vibe) -> bool {
        self == other || self.is_open() || other.is_open()
    }
}

impl fmt::Display for Vibe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Vibe::Thinking => "thinking",
            Vibe::Intros => "intros",
            Vibe::Banter => "banter",
            Vibe::Surprise => "surprise",
            Vibe::KillingTime => "killing-time",
        };
        f.write_str(name)
    }
}

fn visible_by_default() -> bool {
    true
}

/// One scripted actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaPresence {
    pub session_id: SessionId,

    /// Opaque auth credential. Empty means "missing", which fails that
    /// actor's creation but not the script load.
    #[serde(default)]
    pub token: String,

    pub handle: String,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    pub vibe: Vibe,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,

    #[serde(default = "visible_by_default", alias = "visible")]
    pub visibility_default: bool,
}

impl PersonaPresence {
    /// Creates a persona with a derived token and no tags or location.
    pub fn new(session_id: impl Into<SessionId>, handle: impl Into<String>, vibe: Vibe) -> Self {
        let session_id = session_id.into();
        Self {
            token: format!("{}-token", session_id),
            session_id,
            handle: handle.into(),
            tags: BTreeSet::new(),
            vibe,
            geo: None,
            visibility_default: true,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_geo(mut self, geo: GeoPoint) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visibility_default = false;
        self
    }

    /// Structural checks applied at load time.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let invalid = |reason: String| ScenarioError::InvalidPersona {
            session_id: self.session_id.clone(),
            reason,
        };
        if self.session_id.is_blank() {
            return Err(invalid("sessionId is empty".to_string()));
        }
        if self.handle.trim().is_empty() {
            return Err(invalid("handle is empty".to_string()));
        }
        if let Some(geo) = &self.geo {
            geo.validate().map_err(|e| invalid(format!("malformed geo: {}", e)))?;
        }
        Ok(())
    }

    /// Credential check applied when an actor is created.
    pub fn has_credential(&self) -> bool {
        !self.token.trim().is_empty()
    }

    /// Tags present on both personas (exact, case-sensitive match).
    pub fn shared_tags(&self, other: &PersonaPresence) -> BTreeSet<String> {
        self.tags.intersection(&other.tags).cloned().collect()
    }

    /// Compatibility hint between two personas.
    pub fn compatibility(&self, other: &PersonaPresence) -> CompatibilityHint {
        CompatibilityHint {
            shared_tags: self.shared_tags(other),
            vibe_match: self.vibe.compatible_with(&other.vibe),
        }
    }
}

/// Externally observable compatibility signal between two personas.
///
/// Exposed for assertions only; the protocol never enforces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityHint {
    pub shared_tags: BTreeSet<String>,
    pub vibe_match: bool,
}

impl CompatibilityHint {
    /// True when the pair shares at least one tag.
    pub fn shares_signal(&self) -> bool {
        !self.shared_tags.is_empty()
    }
}

/// Root scenario document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaPresenceScript {
    #[serde(default)]
    pub venue: String,
    pub personas: Vec<PersonaPresence>,
}

impl PersonaPresenceScript {
    /// Builds and validates a script from personas.
    pub fn new(venue: impl Into<String>, personas: Vec<PersonaPresence>) -> Result<Self, ScenarioError> {
        let script = Self {
            venue: venue.into(),
            personas,
        };
        script.validate()?;
        Ok(script)
    }

    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        let script: Self = serde_json::from_str(json)?;
        script.validate()?;
        Ok(script)
    }

    /// Loads a script from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Validates every persona and reports all problems together.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let mut seen = HashSet::new();
        let mut errors = Vec::new();

        for persona in &self.personas {
            if let Err(e) = persona.validate() {
                errors.push(e);
            }
            if !seen.insert(&persona.session_id) {
                errors.push(ScenarioError::DuplicateSessionId(persona.session_id.clone()));
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ScenarioError::Multiple(errors)),
        }
    }

    pub fn persona(&self, session_id: &SessionId) -> Option<&PersonaPresence> {
        self.personas.iter().find(|p| &p.session_id == session_id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.personas.iter().map(|p| p.session_id.clone()).collect()
    }

    /// Compatibility hint between two scripted personas.
    pub fn compatibility(&self, a: &SessionId, b: &SessionId) -> Option<CompatibilityHint> {
        Some(self.persona(a)?.compatibility(self.persona(b)?))
    }
}
