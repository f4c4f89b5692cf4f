//! Common types for the presence environment abstraction.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque actor key, unique within one presence script.
///
/// This is the join key between the scenario model, protocol mock
/// connections and telemetry records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the id is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of one scenario run.
///
/// Random UUID v4 per run, so repeated runs never overwrite each other's
/// telemetry. Tests build fixed ids with [`RunId::from_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Creates a new random RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a RunId from raw random bytes (for seeded simulation).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// A declared persona location.
///
/// `floor` is venue-local and independent of lat/lon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<i32>,
}

impl GeoPoint {
    /// Creates a point without floor information.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon, floor: None }
    }

    /// Sets the venue floor.
    pub fn with_floor(mut self, floor: i32) -> Self {
        self.floor = Some(floor);
        self
    }

    /// Checks that the coordinate is finite and within WGS84 bounds.
    pub fn validate(&self) -> Result<(), String> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(format!("non-finite coordinate ({}, {})", self.lat, self.lon));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(format!("latitude {} out of range", self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(format!("longitude {} out of range", self.lon));
        }
        Ok(())
    }
}

/// Named interactive elements whose visibility is a telemetry signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Affordance {
    PanicButton,
    VisibilityToggle,
}

impl Affordance {
    /// All defined affordances.
    pub fn all() -> [Affordance; 2] {
        [Affordance::PanicButton, Affordance::VisibilityToggle]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Affordance::PanicButton => "panicButton",
            Affordance::VisibilityToggle => "visibilityToggle",
        }
    }
}

impl fmt::Display for Affordance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Affordance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "panicButton" | "panic-button" => Ok(Affordance::PanicButton),
            "visibilityToggle" | "visibility-toggle" => Ok(Affordance::VisibilityToggle),
            _ => Err(format!("Unknown affordance: {}", s)),
        }
    }
}

/// Opaque reference to a place in the product's navigation surface
/// (e.g. "the proximity-feed view has loaded").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Waypoint(String);

impl Waypoint {
    pub const WELCOME: &'static str = "welcome";
    pub const ONBOARDING: &'static str = "onboarding";
    pub const RADAR: &'static str = "radar";
    pub const CHAT: &'static str = "chat";
    pub const PROFILE: &'static str = "profile";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn welcome() -> Self {
        Self::new(Self::WELCOME)
    }

    pub fn onboarding() -> Self {
        Self::new(Self::ONBOARDING)
    }

    /// The proximity feed.
    pub fn radar() -> Self {
        Self::new(Self::RADAR)
    }

    pub fn chat() -> Self {
        Self::new(Self::CHAT)
    }

    pub fn profile() -> Self {
        Self::new(Self::PROFILE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity installed into a freshly allocated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: SessionId,
    pub token: String,
    pub handle: String,
}
