//! Persona Presence Core - multi-persona presence testing primitives
//!
//! This library carries everything a presence scenario needs apart from the
//! product surface itself:
//! 1. **Scenario Model**: validated persona scripts (identity, tags, vibe, geo)
//! 2. **Protocol Mock**: scenario-scoped fake presence server with per-session event channels
//! 3. **Telemetry**: per-run UX records, persisted atomically one file per (persona, run)
//! 4. **Aggregation**: rolling per-persona stats, friction patterns and an append-only report

pub mod aggregate;
pub mod protocol;
pub mod report;
pub mod scenario;
pub mod store;
pub mod telemetry;

// Re-export key types for convenience
pub use aggregate::{
    summarize, AggregatedPersonaStats, FilterError, FrictionEntry, FrictionPattern, Insight, Priority,
    RecordFilter, Severity, Summary,
};
pub use protocol::{
    ChatEndReason, ClientMessage, ConnectionSnapshot, PresenceEntry, PresenceServer, ProtocolConnection,
    Rejection, ServerEvent, ServerMetrics,
};
pub use report::{ReportError, ReportLog};
pub use scenario::{CompatibilityHint, PersonaPresence, PersonaPresenceScript, ScenarioError, Vibe};
pub use store::{SkippedFile, StoreContents, TelemetryError, TelemetryStore};
pub use telemetry::{TelemetryCollector, TelemetryRecord, TimedEvent};
