//! Run reports: HTML summary, markdown brief and the JSON delta.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use askama::Template;
use chrono::{Local, NaiveDate};
use pricewatch_core::lookup::first_value;
use pricewatch_core::{DiffEngine, DiffResult, DiffSummary, PricingRecord, Scalar};
use serde::Serialize;
use tokio::fs;

use crate::RunSummary;

pub const SUMMARY_HTML: &str = "summary.html";
pub const DAILY_BRIEF: &str = "daily_brief.md";
pub const PRICE_DELTA: &str = "price_delta.json";

#[derive(Debug, Clone, Serialize)]
pub struct ReportPaths {
    pub dir: PathBuf,
    pub html: PathBuf,
    pub brief: PathBuf,
    pub delta: PathBuf,
}

pub fn subject_line(run_date: NaiveDate, diff: &DiffSummary) -> String {
    format!(
        "SMS Price Summary {} – Changed:{} New:{} Removed:{}",
        run_date.format("%Y-%m-%d"),
        diff.changed,
        diff.new,
        diff.removed
    )
}

#[derive(Debug, Clone)]
struct ReportRow {
    provider: String,
    country: String,
    network: String,
    mcc: String,
    mnc: String,
    price_old: String,
    price_new: String,
    currency: String,
    effective_from: String,
    direction: String,
}

impl ReportRow {
    fn from_record(
        record: &PricingRecord,
        old: Option<f64>,
        new: Option<f64>,
        direction: &str,
    ) -> Self {
        Self {
            provider: cell(record, &["provider"]),
            country: cell(record, &["country", "country_name"]),
            network: cell(record, &["network", "operator"]),
            mcc: cell(record, &["mcc"]),
            mnc: cell(record, &["mnc"]),
            price_old: format_price(old),
            price_new: format_price(new),
            currency: cell(record, &["currency"]),
            effective_from: cell(record, &["effective_from"]),
            direction: direction.to_string(),
        }
    }
}

struct ReportSection {
    title: &'static str,
    placeholder: &'static str,
    rows: Vec<ReportRow>,
}

#[derive(Template)]
#[template(path = "summary.html")]
struct SummaryTemplate {
    run_date: String,
    generated_at: String,
    summary: DiffSummary,
    sections: Vec<ReportSection>,
}

fn cell(record: &PricingRecord, keys: &[&str]) -> String {
    match first_value(record, keys) {
        Some(Scalar::Number(n)) if n.fract() != 0.0 => format!("{n:.6}"),
        Some(value) => value.as_text(),
        None => String::new(),
    }
}

fn format_price(price: Option<f64>) -> String {
    price.map(|p| format!("{p:.6}")).unwrap_or_default()
}

/// Renders the three-table change summary. Supplier text is HTML-escaped.
pub fn render_summary_html(
    run_date: NaiveDate,
    diff: &DiffResult,
    engine: &DiffEngine,
) -> Result<String> {
    let changed = diff
        .changed
        .iter()
        .map(|c| {
            ReportRow::from_record(&c.after, c.price_before, c.price_after, c.direction.as_str())
        })
        .collect();
    let new = diff
        .new
        .iter()
        .map(|r| ReportRow::from_record(r, None, engine.price_of(r), "new"))
        .collect();
    let removed = diff
        .removed
        .iter()
        .map(|r| ReportRow::from_record(r, engine.price_of(r), None, "removed"))
        .collect();

    let template = SummaryTemplate {
        run_date: run_date.format("%Y-%m-%d").to_string(),
        generated_at: Local::now().format("%Y-%m-%d %H:%M").to_string(),
        summary: diff.summary(),
        sections: vec![
            ReportSection {
                title: "Changed",
                placeholder: "No changes",
                rows: changed,
            },
            ReportSection {
                title: "New",
                placeholder: "No new entries",
                rows: new,
            },
            ReportSection {
                title: "Removed",
                placeholder: "No removed entries",
                rows: removed,
            },
        ],
    };
    template.render().context("rendering summary.html")
}

fn render_daily_brief(summary: &RunSummary, diff: &DiffResult) -> String {
    let mut lines = vec![
        "# Supplier Price Daily Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Date: {}", summary.run_date),
        format!("- Policy: {}", summary.policy),
        format!("- Messages: {}", summary.messages),
        format!("- Extracted records: {}", summary.extracted_records),
        format!("- Changed: {}", diff.changed.len()),
        format!("- New: {}", diff.new.len()),
        format!("- Removed: {}", diff.removed.len()),
        format!("- Unchanged: {}", diff.unchanged_count),
    ];
    if !diff.changed.is_empty() {
        lines.push(String::new());
        lines.push("## Changed".to_string());
        for change in &diff.changed {
            lines.push(format!(
                "- {} {}: {} -> {}",
                change.identity,
                change.direction.as_str(),
                format_price(change.price_before),
                format_price(change.price_after)
            ));
        }
    }
    if !summary.failed_sources.is_empty() {
        lines.push(String::new());
        lines.push("## Failed Sources".to_string());
        lines.extend(summary.failed_sources.iter().map(|s| format!("- {s}")));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Writes `summary.html`, `daily_brief.md` and `price_delta.json` under
/// `<reports_dir>/<run date>/`.
pub(crate) async fn write_reports(
    reports_dir: &Path,
    summary: &RunSummary,
    diff: &DiffResult,
    engine: &DiffEngine,
) -> Result<ReportPaths> {
    let dir = reports_dir.join(summary.run_date.format("%Y-%m-%d").to_string());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let paths = ReportPaths {
        html: dir.join(SUMMARY_HTML),
        brief: dir.join(DAILY_BRIEF),
        delta: dir.join(PRICE_DELTA),
        dir,
    };

    let html = render_summary_html(summary.run_date, diff, engine)?;
    fs::write(&paths.html, html)
        .await
        .with_context(|| format!("writing {}", paths.html.display()))?;

    fs::write(&paths.brief, render_daily_brief(summary, diff))
        .await
        .with_context(|| format!("writing {}", paths.brief.display()))?;

    let delta = serde_json::to_vec_pretty(&serde_json::json!({
        "run": summary,
        "diff": diff,
    }))
    .context("serializing price delta")?;
    fs::write(&paths.delta, delta)
        .await
        .with_context(|| format!("writing {}", paths.delta.display()))?;

    Ok(paths)
}

/// Markdown index of the newest `runs` report directories.
pub fn report_history_markdown(runs: usize, reports_dir: &Path) -> Result<String> {
    let mut dirs = std::fs::read_dir(reports_dir)
        .with_context(|| format!("reading {}", reports_dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    dirs.sort();
    dirs.reverse();

    let mut lines = vec!["# Supplier Price Report History".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let delta_path = dir.join(PRICE_DELTA);
        if !delta_path.exists() {
            continue;
        }
        let delta: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&delta_path)
                .with_context(|| format!("reading {}", delta_path.display()))?,
        )
        .with_context(|| format!("parsing {}", delta_path.display()))?;

        let run = delta.get("run");
        let count = |key: &str| {
            run.and_then(|r| r.get("diff"))
                .and_then(|d| d.get(key))
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
        };
        let subject = run
            .and_then(|r| r.get("subject"))
            .and_then(|v| v.as_str())
            .unwrap_or("(no subject)");

        lines.push(format!("## {name}"));
        lines.push(format!("- subject: {subject}"));
        lines.push(format!(
            "- changed: {} / new: {} / removed: {} / unchanged: {}",
            count("changed"),
            count("new"),
            count("removed"),
            count("unchanged")
        ));
        lines.push(format!("- delta: `{}`", delta_path.display()));
        let html_path = dir.join(SUMMARY_HTML);
        if html_path.exists() {
            lines.push(format!("- summary: `{}`", html_path.display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}
