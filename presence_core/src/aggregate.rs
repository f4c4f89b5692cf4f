//! Friction aggregation over persisted telemetry.
//!
//! [`summarize`] is a pure function of the record set: it groups by persona,
//! maintains rolling averages, counts thresholded friction patterns and
//! derives ranked insights. [`Summary::render`] turns the result into a
//! markdown section for the report log.

use crate::telemetry::TelemetryRecord;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use thiserror::Error;

/// Boot time above which a run counts as slow.
pub const SLOW_BOOT_MS: u64 = 3_000;

/// Onboarding time above which a run counts as slow.
pub const SLOW_ONBOARDING_MS: u64 = 30_000;

/// Patterns kept in the report.
pub const TOP_PATTERNS: usize = 5;

const MAX_AFFECTED_PERSONAS: usize = 5;

/// Per-persona rollup; recomputed on every pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedPersonaStats {
    pub persona: String,
    pub run_count: u64,
    pub avg_boot_time: f64,
    pub avg_onboarding_time: f64,
    pub total_retries: u64,
    pub total_errors: u64,
    pub a11y_issues: u64,
    pub affordance_issues: u64,
    #[serde(skip)]
    boot_samples: u64,
    #[serde(skip)]
    onboarding_samples: u64,
}

impl AggregatedPersonaStats {
    fn new(persona: &str) -> Self {
        Self {
            persona: persona.to_string(),
            ..Default::default()
        }
    }

    fn absorb(&mut self, record: &TelemetryRecord) {
        self.run_count += 1;

        if let Some(boot) = record.timings.boot_ms {
            self.boot_samples += 1;
            self.avg_boot_time = rolling_mean(self.avg_boot_time, boot as f64, self.boot_samples);
        }
        if let Some(onboarding) = record.timings.onboarding_ms {
            self.onboarding_samples += 1;
            self.avg_onboarding_time =
                rolling_mean(self.avg_onboarding_time, onboarding as f64, self.onboarding_samples);
        }

        self.total_retries += u64::from(record.interactions.steps_retried);
        self.total_errors += record.errors.len() as u64;
        self.a11y_issues += u64::from(record.accessibility.a11y_violations.unwrap_or(0));

        let affordances = record.accessibility.visible_affordances;
        self.affordance_issues += u64::from(!affordances.panic_button) + u64::from(!affordances.visibility_toggle);
    }
}

/// `avg_n = avg_{n-1} + (x_n - avg_{n-1}) / n`
fn rolling_mean(previous: f64, sample: f64, n: u64) -> f64 {
    previous + (sample - previous) / n as f64
}

/// Thresholded friction conditions, in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrictionPattern {
    SlowBoot,
    SlowOnboarding,
    StepRetries,
    ErrorBanners,
    A11yViolations,
    MissingPanicButton,
    MissingVisibilityToggle,
    RuntimeErrors,
}

impl FrictionPattern {
    pub fn all() -> [FrictionPattern; 8] {
        [
            FrictionPattern::SlowBoot,
            FrictionPattern::SlowOnboarding,
            FrictionPattern::StepRetries,
            FrictionPattern::ErrorBanners,
            FrictionPattern::A11yViolations,
            FrictionPattern::MissingPanicButton,
            FrictionPattern::MissingVisibilityToggle,
            FrictionPattern::RuntimeErrors,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrictionPattern::SlowBoot => "slow-boot",
            FrictionPattern::SlowOnboarding => "slow-onboarding",
            FrictionPattern::StepRetries => "step-retries",
            FrictionPattern::ErrorBanners => "error-banners",
            FrictionPattern::A11yViolations => "a11y-violations",
            FrictionPattern::MissingPanicButton => "missing-panic-button",
            FrictionPattern::MissingVisibilityToggle => "missing-visibility-toggle",
            FrictionPattern::RuntimeErrors => "runtime-errors",
        }
    }

    /// How much one record contributes to this pattern's counter.
    ///
    /// Threshold and affordance patterns add one per record; the others add
    /// their magnitude.
    pub fn occurrences(&self, record: &TelemetryRecord) -> u64 {
        let timings = &record.timings;
        let a11y = &record.accessibility;
        match self {
            FrictionPattern::SlowBoot => {
                u64::from(timings.boot_ms.map(|ms| ms > SLOW_BOOT_MS).unwrap_or(false))
            }
            FrictionPattern::SlowOnboarding => u64::from(
                timings
                    .onboarding_ms
                    .map(|ms| ms > SLOW_ONBOARDING_MS)
                    .unwrap_or(false),
            ),
            FrictionPattern::StepRetries => u64::from(record.interactions.steps_retried),
            FrictionPattern::ErrorBanners => u64::from(record.interactions.error_banners_encountered),
            FrictionPattern::A11yViolations => u64::from(a11y.a11y_violations.unwrap_or(0)),
            FrictionPattern::MissingPanicButton => u64::from(!a11y.visible_affordances.panic_button),
            FrictionPattern::MissingVisibilityToggle => {
                u64::from(!a11y.visible_affordances.visibility_toggle)
            }
            FrictionPattern::RuntimeErrors => record.errors.len() as u64,
        }
    }

    fn guidance(&self) -> (&'static str, &'static str, &'static [&'static str]) {
        match self {
            FrictionPattern::SlowBoot => (
                "Slow application boot",
                "performance",
                &[
                    "Profile the boot sequence and defer non-critical requests",
                    "Split the initial bundle and lazy-load secondary views",
                    "Check whether the realtime connection blocks first render",
                ],
            ),
            FrictionPattern::SlowOnboarding => (
                "Onboarding takes too long",
                "conversion",
                &[
                    "Reduce or merge onboarding steps",
                    "Batch the API calls made while onboarding",
                    "Show progress so users know how much is left",
                ],
            ),
            FrictionPattern::StepRetries => (
                "Users retry onboarding steps",
                "usability",
                &[
                    "Review step copy for clarity",
                    "Surface validation feedback before submit",
                    "Check which step sends users back most often",
                ],
            ),
            FrictionPattern::ErrorBanners => (
                "Error banners appear frequently",
                "reliability",
                &[
                    "Identify the most common error banner triggers",
                    "Review network timeout and reconnect handling",
                    "Make user-facing error messages actionable",
                ],
            ),
            FrictionPattern::A11yViolations => (
                "Accessibility violations detected",
                "accessibility",
                &[
                    "Fix contrast issues to meet WCAG AA",
                    "Add labels to unlabeled interactive elements",
                    "Verify keyboard navigation reaches every control",
                ],
            ),
            FrictionPattern::MissingPanicButton => (
                "Panic button not visible",
                "accessibility",
                &[
                    "Verify the panic button renders on radar, chat and profile",
                    "Check that it is visible right after onboarding completes",
                    "Look for styles that hide it by default",
                ],
            ),
            FrictionPattern::MissingVisibilityToggle => (
                "Visibility toggle not detected",
                "privacy",
                &[
                    "Verify the toggle renders on the profile view",
                    "Check whether it is conditionally hidden for some states",
                    "Make sure walkthroughs actually reach the profile view",
                ],
            ),
            FrictionPattern::RuntimeErrors => (
                "Runtime errors during runs",
                "reliability",
                &[
                    "Group recorded errors by message to find the top offenders",
                    "Add error boundaries around async views",
                    "Log unhandled rejections with context",
                ],
            ),
        }
    }
}

impl fmt::Display for FrictionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_count(count: u64) -> Self {
        if count >= 10 {
            Severity::High
        } else if count >= 5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    fn score(&self) -> f64 {
        match self {
            Severity::High => 100.0,
            Severity::Medium => 60.0,
            Severity::Low => 30.0,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrictionEntry {
    pub pattern: FrictionPattern,
    pub count: u64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn from_impact(impact: u32) -> Self {
        match impact {
            i if i >= 70 => Priority::Critical,
            i if i >= 50 => Priority::High,
            i if i >= 30 => Priority::Medium,
            _ => Priority::Low,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

/// A ranked, actionable reading of one friction pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub pattern: FrictionPattern,
    pub title: String,
    pub category: String,
    pub recommendations: Vec<String>,
    pub impact_score: u32,
    pub priority: Priority,
    pub occurrences: u64,
    pub affected_personas: Vec<String>,
}

/// Output of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_runs: u64,
    pub stats: BTreeMap<String, AggregatedPersonaStats>,
    pub friction_patterns: Vec<FrictionEntry>,
    pub insights: Vec<Insight>,
    /// Files the store could not read; informational only.
    pub skipped_files: usize,
}

/// Name a record is grouped and reported under.
fn persona_name(record: &TelemetryRecord) -> &str {
    if record.persona.is_empty() {
        "unknown"
    } else {
        record.persona.as_str()
    }
}

/// Groups records by persona and ranks friction.
pub fn summarize(records: &[TelemetryRecord]) -> Summary {
    let mut stats: BTreeMap<String, AggregatedPersonaStats> = BTreeMap::new();
    let mut counts: BTreeMap<FrictionPattern, u64> = BTreeMap::new();

    for record in records {
        let persona = persona_name(record);
        stats
            .entry(persona.to_string())
            .or_insert_with(|| AggregatedPersonaStats::new(persona))
            .absorb(record);

        for pattern in FrictionPattern::all() {
            let n = pattern.occurrences(record);
            if n > 0 {
                *counts.entry(pattern).or_insert(0) += n;
            }
        }
    }

    // BTreeMap iteration is pattern order; the stable sort keeps it for ties.
    let mut friction_patterns: Vec<FrictionEntry> = counts
        .into_iter()
        .map(|(pattern, count)| FrictionEntry {
            pattern,
            count,
            severity: Severity::from_count(count),
        })
        .collect();
    friction_patterns.sort_by(|a, b| b.count.cmp(&a.count));
    friction_patterns.truncate(TOP_PATTERNS);

    let total_runs = records.len() as u64;
    let mut insights: Vec<Insight> = friction_patterns
        .iter()
        .map(|entry| insight_for(entry, records, total_runs))
        .collect();
    insights.sort_by(|a, b| b.impact_score.cmp(&a.impact_score));

    Summary {
        total_runs,
        stats,
        friction_patterns,
        insights,
        skipped_files: 0,
    }
}

fn insight_for(entry: &FrictionEntry, records: &[TelemetryRecord], total_runs: u64) -> Insight {
    let frequency = if total_runs == 0 {
        0.0
    } else {
        (entry.count as f64 / total_runs as f64 * 100.0).min(100.0)
    };
    let impact_score = (0.6 * frequency + 0.4 * entry.severity.score()).round() as u32;

    let mut affected_personas: Vec<String> = Vec::new();
    for record in records {
        if affected_personas.len() >= MAX_AFFECTED_PERSONAS {
            break;
        }
        let persona = persona_name(record);
        if entry.pattern.occurrences(record) > 0 && !affected_personas.iter().any(|p| p == persona) {
            affected_personas.push(persona.to_string());
        }
    }

    let (title, category, recommendations) = entry.pattern.guidance();
    Insight {
        pattern: entry.pattern,
        title: title.to_string(),
        category: category.to_string(),
        recommendations: recommendations.iter().map(|r| r.to_string()).collect(),
        impact_score,
        priority: Priority::from_impact(impact_score),
        occurrences: entry.count,
        affected_personas,
    }
}

impl Summary {
    pub fn is_empty(&self) -> bool {
        self.total_runs == 0
    }

    pub fn with_skipped(mut self, skipped: usize) -> Self {
        self.skipped_files = skipped;
        self
    }

    /// Markdown section for this pass. Same summary and timestamp, same text.
    pub fn render(&self, generated_at: DateTime<Utc>) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.render_into(&mut out, generated_at);
        out
    }

    fn render_into(&self, out: &mut String, generated_at: DateTime<Utc>) -> fmt::Result {
        writeln!(out, "# Persona Test Feedback Summary")?;
        writeln!(out)?;
        writeln!(out, "**Generated**: {}", generated_at.to_rfc3339())?;
        writeln!(out)?;

        if self.is_empty() {
            writeln!(out, "## No Data")?;
            writeln!(out)?;
            writeln!(out, "No readable telemetry records were found for this pass.")?;
            if self.skipped_files > 0 {
                writeln!(out, "{} file(s) were skipped as unreadable.", self.skipped_files)?;
            }
            return Ok(());
        }

        writeln!(out, "## Overall Statistics")?;
        writeln!(out)?;
        writeln!(out, "- **Total Runs**: {}", self.total_runs)?;
        writeln!(out, "- **Personas Tested**: {}", self.stats.len())?;
        if self.skipped_files > 0 {
            writeln!(out, "- **Skipped Files**: {}", self.skipped_files)?;
        }
        writeln!(out)?;

        writeln!(out, "## Per-Persona Statistics")?;
        writeln!(out)?;
        for stat in self.stats.values() {
            writeln!(out, "### {}", stat.persona)?;
            writeln!(out, "- **Runs**: {}", stat.run_count)?;
            writeln!(out, "- **Avg Boot Time**: {}ms", stat.avg_boot_time.round())?;
            writeln!(out, "- **Avg Onboarding Time**: {}ms", stat.avg_onboarding_time.round())?;
            writeln!(out, "- **Total Retries**: {}", stat.total_retries)?;
            writeln!(out, "- **Total Errors**: {}", stat.total_errors)?;
            writeln!(out, "- **A11y Issues**: {}", stat.a11y_issues)?;
            writeln!(out, "- **Affordance Issues**: {}", stat.affordance_issues)?;
            writeln!(out)?;
        }

        writeln!(out, "## Top {} Friction Patterns", TOP_PATTERNS)?;
        writeln!(out)?;
        if self.friction_patterns.is_empty() {
            writeln!(out, "No friction patterns identified.")?;
        }
        for entry in &self.friction_patterns {
            writeln!(
                out,
                "- **{}**: {} occurrences ({})",
                entry.pattern,
                entry.count,
                entry.severity.label()
            )?;
        }
        writeln!(out)?;

        writeln!(out, "## Executive Summary")?;
        writeln!(out)?;
        let critical = self.count_priority(Priority::Critical);
        let high = self.count_priority(Priority::High);
        if critical > 0 {
            writeln!(out, "- **{} critical issue(s)** need immediate attention", critical)?;
        }
        if high > 0 {
            writeln!(out, "- **{} high-priority issue(s)** should be addressed soon", high)?;
        }
        if critical == 0 && high == 0 {
            writeln!(out, "- No critical or high-priority issues identified")?;
        }
        writeln!(out)?;

        writeln!(out, "## Actionable Insights")?;
        writeln!(out)?;
        if self.insights.is_empty() {
            writeln!(out, "All metrics within acceptable ranges.")?;
            writeln!(out)?;
        }
        for insight in &self.insights {
            writeln!(out, "### {} (Impact: {}/100)", insight.title, insight.impact_score)?;
            writeln!(out)?;
            writeln!(
                out,
                "**Priority**: {} | **Category**: {} | **Occurrences**: {}",
                insight.priority.label(),
                insight.category,
                insight.occurrences
            )?;
            writeln!(out)?;
            if !insight.affected_personas.is_empty() {
                writeln!(out, "**Affected Personas**: {}", insight.affected_personas.join(", "))?;
                writeln!(out)?;
            }
            writeln!(out, "**Recommendations**:")?;
            for rec in &insight.recommendations {
                writeln!(out, "- {}", rec)?;
            }
            writeln!(out)?;
        }

        Ok(())
    }

    fn count_priority(&self, priority: Priority) -> usize {
        self.insights.iter().filter(|i| i.priority == priority).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid window '{0}', expected <N>d (e.g. 7d)")]
    InvalidWindow(String),
}

/// Optional time window over record timestamps. Empty means everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl RecordFilter {
    /// From midnight UTC of a `YYYY-MM-DD` date.
    pub fn since_date(date: &str) -> Result<Self, FilterError> {
        let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| FilterError::InvalidDate(date.to_string()))?;
        let since = day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| FilterError::InvalidDate(date.to_string()))?
            .and_utc();
        Ok(Self { since: Some(since), until: None })
    }

    /// The last `Nd` days before `now`.
    pub fn window(text: &str, now: DateTime<Utc>) -> Result<Self, FilterError> {
        let days: i64 = text
            .strip_suffix('d')
            .or_else(|| text.strip_suffix('D'))
            .and_then(|n| n.parse().ok())
            .filter(|n| *n >= 0)
            .ok_or_else(|| FilterError::InvalidWindow(text.to_string()))?;
        Ok(Self {
            since: Some(now - ChronoDuration::days(days)),
            until: None,
        })
    }

    pub fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }

    pub fn matches(&self, record: &TelemetryRecord) -> bool {
        self.since.map(|s| record.timestamp >= s).unwrap_or(true)
            && self.until.map(|u| record.timestamp <= u).unwrap_or(true)
    }

    pub fn apply(&self, records: Vec<TelemetryRecord>) -> Vec<TelemetryRecord> {
        if self.is_unbounded() {
            return records;
        }
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use presence_env::RunId;
    use proptest::prelude::*;

    fn record(persona: &str) -> TelemetryRecord {
        let mut r = TelemetryRecord::new(persona, RunId::from_bytes([1; 16]));
        r.accessibility.visible_affordances.panic_button = true;
        r.accessibility.visible_affordances.visibility_toggle = true;
        r
    }

    fn entry(summary: &Summary, pattern: FrictionPattern) -> Option<&FrictionEntry> {
        summary.friction_patterns.iter().find(|e| e.pattern == pattern)
    }

    #[test]
    fn test_twelve_missing_panic_buttons_is_high() {
        let records: Vec<_> = (0..12)
            .map(|i| {
                let mut r = record(&format!("persona-{}", i % 3));
                r.accessibility.visible_affordances.panic_button = false;
                r
            })
            .collect();

        let summary = summarize(&records);
        let e = entry(&summary, FrictionPattern::MissingPanicButton).unwrap();
        assert_eq!(e.count, 12);
        assert_eq!(e.severity, Severity::High);
        assert_eq!(summary.friction_patterns.len(), 1);
    }

    #[test]
    fn test_thresholds_and_magnitudes() {
        let mut a = record("maya");
        a.timings.boot_ms = Some(3_000);
        a.timings.onboarding_ms = Some(30_001);
        a.interactions.steps_retried = 3;
        a.accessibility.a11y_violations = Some(2);
        a.errors = vec!["x".into(), "y".into()];

        let mut b = record("zoe");
        b.timings.boot_ms = Some(3_001);
        b.interactions.error_banners_encountered = 4;

        let summary = summarize(&[a, b]);
        assert_eq!(entry(&summary, FrictionPattern::SlowBoot).unwrap().count, 1);
        assert_eq!(entry(&summary, FrictionPattern::StepRetries).unwrap().count, 3);
        assert_eq!(entry(&summary, FrictionPattern::ErrorBanners).unwrap().count, 4);
        // Six patterns fired; slow-onboarding loses the tie with slow-boot.
        assert_eq!(summary.friction_patterns.len(), TOP_PATTERNS);
        assert!(entry(&summary, FrictionPattern::SlowOnboarding).is_none());
        assert_eq!(summary.friction_patterns[0].pattern, FrictionPattern::ErrorBanners);
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(Severity::from_count(4), Severity::Low);
        assert_eq!(Severity::from_count(5), Severity::Medium);
        assert_eq!(Severity::from_count(9), Severity::Medium);
        assert_eq!(Severity::from_count(10), Severity::High);
    }

    #[test]
    fn test_ties_keep_pattern_order() {
        let mut r = record("maya");
        r.accessibility.visible_affordances = Default::default();
        let summary = summarize(&[r]);
        assert_eq!(summary.friction_patterns[0].pattern, FrictionPattern::MissingPanicButton);
        assert_eq!(summary.friction_patterns[1].pattern, FrictionPattern::MissingVisibilityToggle);
    }

    #[test]
    fn test_stats_per_persona() {
        let mut a = record("maya");
        a.timings.boot_ms = Some(1000);
        a.interactions.steps_retried = 2;
        let mut b = record("maya");
        b.timings.boot_ms = Some(2000);
        b.accessibility.visible_affordances.visibility_toggle = false;
        let c = record("maya");

        let summary = summarize(&[a, b, c]);
        let maya = &summary.stats["maya"];
        assert_eq!(maya.run_count, 3);
        assert_relative_eq!(maya.avg_boot_time, 1500.0);
        assert_relative_eq!(maya.avg_onboarding_time, 0.0);
        assert_eq!(maya.total_retries, 2);
        assert_eq!(maya.affordance_issues, 1);
    }

    #[test]
    fn test_unnamed_persona_reported_under_one_name() {
        let mut blank = record("");
        blank.accessibility.visible_affordances.panic_button = false;
        let mut named = record("maya");
        named.accessibility.visible_affordances.panic_button = false;

        let summary = summarize(&[blank, named]);
        assert!(summary.stats.contains_key("unknown"));
        assert!(!summary.stats.contains_key(""));

        let insight = &summary.insights[0];
        assert_eq!(insight.pattern, FrictionPattern::MissingPanicButton);
        assert_eq!(insight.affected_personas, vec!["unknown", "maya"]);
    }

    #[test]
    fn test_insight_scoring() {
        let records: Vec<_> = (0..12)
            .map(|i| {
                let mut r = record(&format!("p{}", i));
                r.accessibility.visible_affordances.panic_button = false;
                r
            })
            .collect();
        let summary = summarize(&records);
        let insight = &summary.insights[0];
        // frequency 100, severity 100
        assert_eq!(insight.impact_score, 100);
        assert_eq!(insight.priority, Priority::Critical);
        assert_eq!(insight.affected_personas, vec!["p0", "p1", "p2", "p3", "p4"]);
        assert_eq!(insight.category, "accessibility");

        let mut one = record("solo");
        one.errors.push("boom".into());
        let mut filler: Vec<_> = (0..9).map(|i| record(&format!("f{}", i))).collect();
        filler.push(one);
        let summary = summarize(&filler);
        // frequency 10, low severity: 6 + 12
        assert_eq!(summary.insights[0].impact_score, 18);
        assert_eq!(summary.insights[0].priority, Priority::Low);
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut r = record("maya");
        r.timings.boot_ms = Some(4200);
        let summary = summarize(&[r.clone(), r]);
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();

        let text = summary.render(at);
        assert_eq!(text, summary.render(at));
        assert!(text.contains("2026-01-02T03:04:05"));
        assert!(text.contains("### maya"));
        assert!(text.contains("**slow-boot**: 2 occurrences (low)"));
        assert!(text.contains("Slow application boot"));
    }

    #[test]
    fn test_empty_input_renders_no_data() {
        let summary = summarize(&[]).with_skipped(2);
        assert!(summary.is_empty());
        let text = summary.render(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        assert!(text.contains("## No Data"));
        assert!(text.contains("2 file(s) were skipped"));
    }

    #[test]
    fn test_filters() {
        let mut old = record("maya");
        old.timestamp = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut new = record("zoe");
        new.timestamp = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();

        let since = RecordFilter::since_date("2026-03-05").unwrap();
        let kept = since.apply(vec![old.clone(), new.clone()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].persona, "zoe");

        let now = Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap();
        let window = RecordFilter::window("7d", now).unwrap();
        assert!(!window.matches(&old));
        assert!(window.matches(&new));

        assert_eq!(RecordFilter::default().apply(vec![old, new]).len(), 2);
        assert!(RecordFilter::since_date("03/05/2026").is_err());
        assert_eq!(
            RecordFilter::window("week", now),
            Err(FilterError::InvalidWindow("week".into()))
        );
    }

    proptest! {
        #[test]
        fn prop_rolling_average_equals_mean(boots in proptest::collection::vec(proptest::option::of(0u64..120_000), 1..40)) {
            let records: Vec<_> = boots
                .iter()
                .map(|b| {
                    let mut r = record("maya");
                    r.timings.boot_ms = *b;
                    r
                })
                .collect();

            let summary = summarize(&records);
            let samples: Vec<f64> = boots.iter().flatten().map(|b| *b as f64).collect();
            let expected = if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            };

            let stats = &summary.stats["maya"];
            prop_assert_eq!(stats.run_count, boots.len() as u64);
            prop_assert!((stats.avg_boot_time - expected).abs() <= 1e-6 * expected.max(1.0));
        }
    }
}
