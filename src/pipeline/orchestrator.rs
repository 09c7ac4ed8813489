//! Run orchestration
//!
//! Drives the five stages in order, advancing the percentage through fixed
//! bands: fetching to 20, normalizing to 30, matching to 35, comparing to 90
//! (scaled by pairs completed), reporting to 100. Cancellation is checked at
//! every stage boundary; each stage runs under the configured time ceiling.

use crate::config::RunSettings;
use crate::error::RunError;
use crate::pipeline::comparator::AiComparator;
use crate::pipeline::fetch::{fetch_stage, Selectors};
use crate::pipeline::{matching, normalize, report};
use crate::progress::{ProgressTracker, RunStatus};
use crate::services::{ErpSource, NotionSource, ReportWriter, VerdictModel};
use crate::types::RunSummary;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const PCT_NORMALIZED: u8 = 30;
const PCT_MATCHED: u8 = 35;
const PCT_COMPARED: u8 = 90;

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    /// Sheet URL or local file path, absent when report persistence failed
    pub report_location: Option<String>,
    /// True when the comparison finished but the report could not be written
    pub degraded: bool,
}

pub struct Orchestrator {
    erp: Arc<dyn ErpSource>,
    notion: Arc<dyn NotionSource>,
    model: Arc<dyn VerdictModel>,
    writer: Arc<dyn ReportWriter>,
    settings: RunSettings,
    tracker: ProgressTracker,
}

impl Orchestrator {
    pub fn new(
        erp: Arc<dyn ErpSource>,
        notion: Arc<dyn NotionSource>,
        model: Arc<dyn VerdictModel>,
        writer: Arc<dyn ReportWriter>,
        settings: RunSettings,
        tracker: ProgressTracker,
    ) -> Self {
        Self {
            erp,
            notion,
            model,
            writer,
            settings,
            tracker,
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Run the pipeline and move the tracker to the matching terminal status.
    /// `begin_run` must have been called first; the token is the one it
    /// returned.
    pub async fn execute(
        &self,
        selectors: Selectors,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let result = self.run(&selectors, &cancel).await;

        match &result {
            Ok(outcome) => {
                self.tracker
                    .info(format!(
                        "Run complete: {} comparisons, {} report rows in {:.1}s",
                        outcome.summary.total_comparisons,
                        outcome.summary.total_rows,
                        outcome.summary.processing_time.as_secs_f64()
                    ))
                    .await;
                self.tracker.finish(RunStatus::Completed).await;
            }
            Err(RunError::Cancelled { .. }) => {
                self.tracker.info("Run cancelled").await;
                self.tracker.finish(RunStatus::Cancelled).await;
            }
            Err(e) => {
                self.tracker.error(e.to_string()).await;
                self.tracker.finish(RunStatus::Error).await;
            }
        }

        result
    }

    fn check_cancel(
        &self,
        cancel: &CancellationToken,
        partial: Option<RunSummary>,
    ) -> Result<(), RunError> {
        if cancel.is_cancelled() {
            Err(RunError::Cancelled { partial })
        } else {
            Ok(())
        }
    }

    async fn run(
        &self,
        selectors: &Selectors,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let started = Instant::now();
        let ceiling = self.settings.stage_timeout();

        // Fetching (0 -> 20)
        let fetched = timeout(
            ceiling,
            fetch_stage(self.erp.as_ref(), self.notion.as_ref(), selectors, &self.tracker),
        )
        .await
        .map_err(|_| RunError::StageTimeout("fetching"))??;
        self.check_cancel(cancel, None)?;

        if fetched.erp.is_empty() && fetched.notion.is_empty() {
            return Err(RunError::NoData);
        }

        // Normalizing (20 -> 30)
        self.tracker.info("Normalizing records").await;
        let erp_norm = normalize::normalize_erp(&fetched.erp)?;
        let notion_norm = normalize::normalize_notion(&fetched.notion)?;
        for warning in erp_norm.warnings.iter().chain(&notion_norm.warnings) {
            self.tracker.warn(warning.clone()).await;
        }
        self.tracker
            .info(format!(
                "Normalized {} ERP and {} Notion policy records",
                erp_norm.records.len(),
                notion_norm.records.len()
            ))
            .await;
        self.tracker.set_percentage(PCT_NORMALIZED).await;
        self.check_cancel(cancel, None)?;

        if erp_norm.records.is_empty() && notion_norm.records.is_empty() {
            return Err(RunError::NoData);
        }

        // Matching (30 -> 35)
        let pairs = matching::match_records(&erp_norm.records, &notion_norm.records);
        let matched = pairs.iter().filter(|p| p.is_matched()).count();
        self.tracker
            .info(format!(
                "Matched {} pairs, {} one-sided keys",
                matched,
                pairs.len() - matched
            ))
            .await;
        self.tracker.set_percentage(PCT_MATCHED).await;
        self.check_cancel(cancel, None)?;

        // Comparing (35 -> 90)
        let comparator = AiComparator::new(
            self.model.clone(),
            self.settings.retry.clone(),
            self.settings.comparator_concurrency,
        );
        let verdicts = timeout(
            ceiling,
            comparator.compare_all(pairs, &self.tracker, cancel, (PCT_MATCHED, PCT_COMPARED)),
        )
        .await
        .map_err(|_| RunError::StageTimeout("comparing"))?;

        let summary = report::summarize(
            &verdicts,
            erp_norm.records.len(),
            notion_norm.records.len(),
            started.elapsed(),
        );
        self.check_cancel(cancel, Some(summary.clone()))?;
        self.tracker.set_percentage(PCT_COMPARED).await;

        // Reporting (90 -> 100); persistence failure degrades, never aborts
        self.tracker.info("Writing comparison report").await;
        let rows = report::build_rows(&verdicts);
        let (report_location, degraded) = match timeout(ceiling, self.writer.write(&rows)).await {
            Ok(Ok(location)) => {
                self.tracker
                    .info(format!("Report available at {}", location))
                    .await;
                (Some(location), false)
            }
            Ok(Err(e)) => {
                self.tracker
                    .warn(format!("Report could not be written: {}", e))
                    .await;
                (None, true)
            }
            Err(_) => {
                self.tracker
                    .warn("Report write exceeded its time ceiling")
                    .await;
                (None, true)
            }
        };

        Ok(RunOutcome {
            summary,
            report_location,
            degraded,
        })
    }
}
