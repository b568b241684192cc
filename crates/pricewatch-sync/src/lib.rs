//! Run orchestration: collect supplier records, diff against the last
//! snapshot, persist today's snapshot and write the change reports.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use pricewatch_adapters::{
    extract_message, list_message_files, read_message, ColumnMap, RecordExtractor,
    RuleBasedExtractor,
};
use pricewatch_core::{DiffEngine, DiffPolicy, DiffSummary, PricingRecord, Snapshot};
use pricewatch_storage::{SnapshotLayout, SnapshotStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod report;

pub use report::{render_summary_html, report_history_markdown, subject_line, ReportPaths};

pub const CRATE_NAME: &str = "pricewatch-sync";

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub messages_dir: PathBuf,
    pub snapshots_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub rules_dir: PathBuf,
    pub run_date: NaiveDate,
    pub policy: DiffPolicy,
}

impl RunConfig {
    pub fn from_env() -> Self {
        let policy = match std::env::var("PRICEWATCH_DIFF_POLICY") {
            Ok(name) => DiffPolicy::by_name(&name).unwrap_or_else(|| {
                warn!(policy = %name, "unknown PRICEWATCH_DIFF_POLICY; using tolerant");
                DiffPolicy::tolerant()
            }),
            Err(_) => DiffPolicy::tolerant(),
        };
        Self {
            messages_dir: std::env::var("EMAIL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/email_memory")),
            snapshots_dir: std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("logs")),
            reports_dir: std::env::var("REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("reports")),
            rules_dir: std::env::var("PRICEWATCH_RULES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("rules")),
            run_date: Local::now().date_naive(),
            policy,
        }
    }

    pub fn snapshot_layout(&self) -> SnapshotLayout {
        SnapshotLayout::new(self.snapshots_dir.clone(), self.run_date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// No message yielded a record; snapshots and reports were left alone.
    NothingExtracted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub run_date: NaiveDate,
    pub status: RunStatus,
    pub policy: String,
    pub messages: usize,
    pub extracted_records: usize,
    pub failed_sources: Vec<String>,
    pub diff: DiffSummary,
    pub subject: Option<String>,
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_sha256: Option<String>,
    pub reports: Option<ReportPaths>,
}

/// Everything pulled out of the message directory for one run.
#[derive(Debug, Default)]
struct Collected {
    messages: usize,
    records: Vec<PricingRecord>,
    failed_sources: Vec<String>,
}

pub struct RunPipeline {
    config: RunConfig,
    store: SnapshotStore,
    columns: ColumnMap,
    extractor: Box<dyn RecordExtractor>,
}

impl RunPipeline {
    pub fn new(config: RunConfig) -> Result<Self> {
        let columns = ColumnMap::from_rules_dir(&config.rules_dir)?;
        let store = SnapshotStore::new(config.snapshot_layout());
        Ok(Self {
            config,
            store,
            columns,
            extractor: Box::<RuleBasedExtractor>::default(),
        })
    }

    pub fn with_extractor(mut self, extractor: Box<dyn RecordExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "run",
            %run_id,
            date = %self.config.run_date,
            policy = self.config.policy.name()
        );
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunSummary> {
        let started_at = Utc::now();
        let collected = self.collect_records().await?;
        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at: started_at,
            run_date: self.config.run_date,
            status: RunStatus::NothingExtracted,
            policy: self.config.policy.name().to_string(),
            messages: collected.messages,
            extracted_records: collected.records.len(),
            failed_sources: collected.failed_sources,
            diff: DiffSummary::default(),
            subject: None,
            snapshot_path: None,
            snapshot_sha256: None,
            reports: None,
        };

        if collected.records.is_empty() {
            warn!(
                messages = summary.messages,
                failed = summary.failed_sources.len(),
                "no records extracted; leaving snapshots untouched"
            );
            summary.finished_at = Utc::now();
            return Ok(summary);
        }

        let engine = DiffEngine::new(self.config.policy);
        let previous = self.store.load_latest().await;
        let current = Snapshot::new(self.config.run_date, collected.records);
        let diff = engine.diff(&current, &previous);
        summary.diff = diff.summary();
        info!(
            changed = summary.diff.changed,
            new = summary.diff.new,
            removed = summary.diff.removed,
            unchanged = summary.diff.unchanged,
            "diff computed"
        );

        let saved = self.store.save(&current).await?;
        summary.snapshot_path = Some(saved.dated_path);
        summary.snapshot_sha256 = Some(saved.content_hash);
        summary.subject = Some(subject_line(self.config.run_date, &summary.diff));
        summary.status = RunStatus::Completed;
        summary.finished_at = Utc::now();

        let reports =
            report::write_reports(&self.config.reports_dir, &summary, &diff, &engine).await?;
        summary.reports = Some(reports);
        Ok(summary)
    }

    /// Failed messages and parts are recorded and skipped; the run goes on.
    async fn collect_records(&self) -> Result<Collected> {
        let mut collected = Collected::default();
        for path in list_message_files(&self.config.messages_dir)? {
            collected.messages += 1;
            let bundle = match read_message(&path) {
                Ok(bundle) => bundle,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable message");
                    collected.failed_sources.push(path.display().to_string());
                    continue;
                }
            };
            for outcome in extract_message(&bundle, self.extractor.as_ref(), &self.columns).await {
                match outcome.result {
                    Ok(records) => {
                        debug!(
                            source = %outcome.source,
                            records = records.len(),
                            extractor = self.extractor.name(),
                            "extracted"
                        );
                        collected.records.extend(records);
                    }
                    Err(err) => {
                        warn!(source = %outcome.source, error = %err, "extraction failed");
                        collected.failed_sources.push(outcome.source);
                    }
                }
            }
        }
        info!(
            messages = collected.messages,
            records = collected.records.len(),
            failed = collected.failed_sources.len(),
            "messages collected"
        );
        Ok(collected)
    }
}

/// Reads a snapshot or bare record array for ad-hoc comparisons.
pub async fn load_records(path: &Path) -> Result<Snapshot> {
    SnapshotStore::try_load(path)
        .await
        .with_context(|| format!("loading records from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_layout_follows_config() {
        let config = RunConfig {
            messages_dir: PathBuf::from("in"),
            snapshots_dir: PathBuf::from("logs"),
            reports_dir: PathBuf::from("reports"),
            rules_dir: PathBuf::from("rules"),
            run_date: NaiveDate::from_ymd_opt(2025, 9, 8).expect("date"),
            policy: DiffPolicy::fixed_fields(),
        };
        let layout = config.snapshot_layout();
        assert_eq!(layout.dated_path(), PathBuf::from("logs/parsed_2025-09-08.json"));
        assert_eq!(layout.latest_path(), PathBuf::from("logs/latest.json"));
    }

    #[test]
    fn run_status_serializes_snake_case() {
        let value = serde_json::to_value(RunStatus::NothingExtracted).expect("json");
        assert_eq!(value, serde_json::json!("nothing_extracted"));
    }
}
