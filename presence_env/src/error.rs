//! Error types for the presence environment abstraction.

use thiserror::Error;

/// Errors that can occur when talking to an actor's browsing session.
///
/// Slow affordances and events are not errors: every wait is bounded and a
/// timeout reads as "not observed".
#[derive(Debug, Error)]
pub enum EnvError {
    /// The session could not be allocated (bad credential, launcher failure, ...)
    #[error("Session launch failed: {0}")]
    LaunchFailed(String),

    /// Navigation to a waypoint failed
    #[error("Navigation to '{waypoint}' failed: {reason}")]
    NavigationFailed { waypoint: String, reason: String },

    /// Geolocation override was refused
    #[error("Geolocation error: {0}")]
    Geolocation(String),

    /// The session was already closed
    #[error("Session closed: {0}")]
    Closed(String),
}

impl EnvError {
    /// Creates a launch error.
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::LaunchFailed(msg.into())
    }

    /// Creates a navigation error.
    pub fn navigation(waypoint: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::NavigationFailed {
            waypoint: waypoint.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a closed-session error.
    pub fn closed(session: impl std::fmt::Display) -> Self {
        Self::Closed(session.to_string())
    }
}
