//! Turns stored telemetry into a report section.

use crate::config::HarnessConfig;
use chrono::{DateTime, Utc};
use presence_core::{summarize, RecordFilter, ReportError, Summary};
use tracing::info;

/// Reads every stored record, summarizes the ones inside `filter`, and
/// appends the rendered section to the configured report.
///
/// Unreadable telemetry files are skipped; only the report write can fail.
pub fn write_report(
    config: &HarnessConfig,
    filter: RecordFilter,
    now: DateTime<Utc>,
) -> Result<Summary, ReportError> {
    let contents = config.telemetry_store().read_all();
    let read = contents.records.len();
    let records = filter.apply(contents.records);
    if records.len() < read {
        info!("{} of {} records inside the window", records.len(), read);
    }

    let summary = summarize(&records).with_skipped(contents.skipped.len());
    let log = config.report_log();
    log.append(&summary.render(now))?;
    info!(
        "appended summary of {} runs to {}",
        summary.total_runs,
        log.path().display()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> HarnessConfig {
        HarnessConfig::default()
            .with_artifacts_dir(dir.path().join("runs"))
            .with_report_path(dir.path().join("docs/feedback.md"))
    }

    #[test]
    fn test_empty_store_renders_no_data() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let summary = write_report(&config, RecordFilter::default(), now).unwrap();
        assert!(summary.is_empty());

        let sections = config.report_log().sections().unwrap();
        assert_eq!(sections.len(), 1);
        assert!(sections[0].contains("No Data"));
    }

    #[tokio::test]
    async fn test_report_appends_per_summary() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let result = ScenarioRunner::new(config.clone())
            .run(ScenarioId::MutualVisibility)
            .await;
        assert!(result.passed);

        let summary = write_report(&config, RecordFilter::default(), Utc::now()).unwrap();
        assert_eq!(summary.total_runs, 2);
        assert!(summary.stats.contains_key("maya-session"));

        // A window ending before the run excludes everything.
        let past = RecordFilter {
            since: None,
            until: Some(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()),
        };
        let empty = write_report(&config, past, Utc::now()).unwrap();
        assert!(empty.is_empty());

        assert_eq!(config.report_log().sections().unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_files_are_counted_not_fatal() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(&config.artifacts_dir).unwrap();
        std::fs::write(config.artifacts_dir.join("broken-run.json"), "{ not json").unwrap();

        let summary = write_report(&config, RecordFilter::default(), Utc::now()).unwrap();
        assert_eq!(summary.skipped_files, 1);
        assert!(summary.is_empty());
    }
}
