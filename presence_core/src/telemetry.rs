//! Per-run UX telemetry.
//!
//! A [`TelemetryCollector`] accumulates one [`TelemetryRecord`] for a single
//! (persona, run). Every field starts from an explicit default so the record
//! serializes cleanly however partial the run was. Recording never fails;
//! persistence failures are logged and swallowed.

use crate::store::TelemetryStore;
use chrono::{DateTime, Utc};
use presence_env::{Affordance, Clock, RunId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub step_times: BTreeMap<u32, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interactions {
    pub steps_retried: u32,
    pub back_button_clicks: u32,
    pub error_banners_encountered: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleAffordances {
    pub panic_button: bool,
    pub visibility_toggle: bool,
}

impl VisibleAffordances {
    pub fn get(&self, affordance: Affordance) -> bool {
        match affordance {
            Affordance::PanicButton => self.panic_button,
            Affordance::VisibilityToggle => self.visibility_toggle,
        }
    }

    pub fn set(&mut self, affordance: Affordance, visible: bool) {
        match affordance {
            Affordance::PanicButton => self.panic_button = visible,
            Affordance::VisibilityToggle => self.visibility_toggle = visible,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessibility {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a11y_violations: Option<u32>,
    #[serde(default = "default_true")]
    pub focus_order_correct: bool,
    #[serde(default)]
    pub visible_affordances: VisibleAffordances,
}

fn default_true() -> bool {
    true
}

impl Default for Accessibility {
    fn default() -> Self {
        Self {
            a11y_violations: None,
            focus_order_correct: true,
            visible_affordances: VisibleAffordances::default(),
        }
    }
}

/// One persona's telemetry for one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub persona: String,
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub timings: Timings,
    #[serde(default)]
    pub interactions: Interactions,
    #[serde(default)]
    pub accessibility: Accessibility,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl TelemetryRecord {
    pub fn new(persona: impl Into<String>, run_id: RunId) -> Self {
        Self {
            persona: persona.into(),
            run_id,
            session_id: None,
            scenario: None,
            timestamp: Utc::now(),
            timings: Timings::default(),
            interactions: Interactions::default(),
            accessibility: Accessibility::default(),
            errors: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Named timer slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimedEvent {
    Boot,
    Onboarding,
    Step(u32),
}

impl fmt::Display for TimedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimedEvent::Boot => write!(f, "boot"),
            TimedEvent::Onboarding => write!(f, "onboarding"),
            TimedEvent::Step(n) => write!(f, "step-{}", n),
        }
    }
}

impl FromStr for TimedEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boot" => Ok(TimedEvent::Boot),
            "onboarding" => Ok(TimedEvent::Onboarding),
            other => other
                .strip_prefix("step-")
                .and_then(|n| n.parse().ok())
                .map(TimedEvent::Step)
                .ok_or_else(|| format!("Unknown timed event: {}", other)),
        }
    }
}

/// Accumulates and persists one [`TelemetryRecord`].
///
/// Dropping a collector with unpersisted changes flushes it, so a run that
/// errors out or is cancelled still leaves its telemetry behind.
pub struct TelemetryCollector {
    record: TelemetryRecord,
    clock: Arc<dyn Clock>,
    store: TelemetryStore,
    timers: HashMap<TimedEvent, Duration>,
    dirty: bool,
    persisted: Option<PathBuf>,
}

impl TelemetryCollector {
    pub fn new(
        persona: impl Into<String>,
        run_id: RunId,
        clock: Arc<dyn Clock>,
        store: TelemetryStore,
    ) -> Self {
        let mut record = TelemetryRecord::new(persona, run_id);
        record.timestamp = DateTime::<Utc>::from(clock.system_time());
        Self {
            record,
            clock,
            store,
            timers: HashMap::new(),
            dirty: true,
            persisted: None,
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.record.session_id = Some(session_id);
        self
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.record.scenario = Some(scenario.into());
        self
    }

    pub fn record(&self) -> &TelemetryRecord {
        &self.record
    }

    pub fn persona(&self) -> &str {
        &self.record.persona
    }

    pub fn start_timing(&mut self, event: TimedEvent) {
        self.timers.insert(event, self.clock.now());
    }

    /// Stops a timer and stores its duration.
    ///
    /// Returns `None` if the timer was never started.
    pub fn end_timing(&mut self, event: TimedEvent) -> Option<u64> {
        let started = self.timers.remove(&event)?;
        let ms = self.clock.now().saturating_sub(started).as_millis() as u64;
        match event {
            TimedEvent::Boot => self.record.timings.boot_ms = Some(ms),
            TimedEvent::Onboarding => self.record.timings.onboarding_ms = Some(ms),
            TimedEvent::Step(n) => {
                self.record.timings.step_times.insert(n, ms);
            }
        }
        self.dirty = true;
        Some(ms)
    }

    pub fn record_affordance(&mut self, affordance: Affordance, visible: bool) {
        self.record
            .accessibility
            .visible_affordances
            .set(affordance, visible);
        self.dirty = true;
    }

    pub fn record_focus_order(&mut self, correct: bool) {
        self.record.accessibility.focus_order_correct = correct;
        self.dirty = true;
    }

    /// Count from this run's single audit; replaces any earlier value.
    pub fn record_a11y_violations(&mut self, count: u32) {
        self.record.accessibility.a11y_violations = Some(count);
        self.dirty = true;
    }

    pub fn record_error_banner(&mut self) {
        self.record.interactions.error_banners_encountered += 1;
        self.dirty = true;
    }

    pub fn record_step_retry(&mut self) {
        self.record.interactions.steps_retried += 1;
        self.record.interactions.back_button_clicks += 1;
        self.dirty = true;
    }

    /// Appends an error. After the record has been persisted, the file is
    /// rewritten with the late error included.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.record.errors.push(message.into());
        self.dirty = true;
        if self.persisted.is_some() {
            self.write_to_file();
        }
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.record.metadata.insert(key.into(), value.into());
        self.dirty = true;
    }

    /// Persists the current snapshot, overwriting any earlier one.
    ///
    /// Never fails: a storage error is logged and `None` is returned.
    pub fn write_to_file(&mut self) -> Option<PathBuf> {
        match self.store.write(&self.record) {
            Ok(path) => {
                self.dirty = false;
                self.persisted = Some(path.clone());
                Some(path)
            }
            Err(e) => {
                warn!("telemetry write failed for {}: {}", self.record.persona, e);
                None
            }
        }
    }

    /// Final write; returns the stored path if it succeeded.
    pub fn finish(mut self) -> Option<PathBuf> {
        self.write_to_file()
    }
}

impl Drop for TelemetryCollector {
    fn drop(&mut self) {
        if self.dirty {
            debug!("flushing unpersisted telemetry for {}", self.record.persona);
            self.write_to_file();
        }
    }
}
