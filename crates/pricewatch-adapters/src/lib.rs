//! Supplier message adapters: turn message bundles into pricing records.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use pricewatch_core::normalize::{coerce_number, to_float};
use pricewatch_core::{normalize_record, PricingRecord, RawRecord, Scalar, RECOGNIZED_FIELDS};
use scraper::Html;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod rules;

pub use rules::RuleBasedExtractor;

pub const CRATE_NAME: &str = "pricewatch-adapters";

/// One supplier email, with attachments already decoded to rows or text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageBundle {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub filename: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub rows: Option<Vec<RawRecord>>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Spreadsheet,
    Document,
    Other,
}

impl AttachmentKind {
    pub fn classify(filename: &str, content_type: &str) -> Self {
        let name = filename.to_ascii_lowercase();
        let ctype = content_type.to_ascii_lowercase();
        let has_ext = |exts: &[&str]| exts.iter().any(|ext| name.ends_with(ext));
        if has_ext(&[".xlsx", ".xlsm", ".xls", ".csv"])
            || ctype.contains("excel")
            || ctype.contains("csv")
        {
            Self::Spreadsheet
        } else if has_ext(&[".docx", ".pdf"]) || ctype.contains("word") || ctype.contains("pdf") {
            Self::Document
        } else {
            Self::Other
        }
    }
}

impl MessageBundle {
    /// File stem of the message, used as the provider name for its records.
    pub fn provider_hint(&self) -> Option<String> {
        Path::new(&self.filename)
            .file_stem()
            .map(|stem| stem.to_string_lossy().trim().to_string())
            .filter(|stem| !stem.is_empty())
    }

    /// Plain body text; falls back to the HTML body reduced to text.
    pub fn body_text(&self) -> Option<String> {
        if let Some(body) = self.body.as_deref().filter(|b| !b.trim().is_empty()) {
            return Some(body.to_string());
        }
        self.body_html
            .as_deref()
            .map(html_to_text)
            .filter(|text| !text.trim().is_empty())
    }
}

/// Text nodes of an HTML document, one per line.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing message bundle {path}: {source}")]
    Bundle {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("attachment {filename} carries no decoded content")]
    Undecoded { filename: String },
    #[error("{0}")]
    Message(String),
}

/// Result of extracting one message part. Failures are kept, not swallowed.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub source: String,
    pub result: Result<Vec<PricingRecord>, ExtractionError>,
}

impl ExtractionOutcome {
    pub fn record_count(&self) -> usize {
        self.result.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// Text-to-records seam. The production LLM extractor lives outside this
/// workspace; [`RuleBasedExtractor`] is the deterministic stand-in.
#[async_trait]
pub trait RecordExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(
        &self,
        text: &str,
        provider_hint: Option<&str>,
    ) -> Result<Vec<PricingRecord>, ExtractionError>;
}

/// Message files in `dir`, sorted by name. A missing directory yields nothing.
pub fn list_message_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "message directory not found");
        return Ok(Vec::new());
    }
    let mut files = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| {
                        ext.eq_ignore_ascii_case("json") || ext.eq_ignore_ascii_case("txt")
                    })
        })
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

/// `.json` files are bundles; anything else is read as a plain-text body.
pub fn read_message(path: &Path) -> Result<MessageBundle, ExtractionError> {
    let data = fs::read_to_string(path).map_err(|source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let is_bundle = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if !is_bundle {
        return Ok(MessageBundle {
            filename,
            body: Some(data),
            ..Default::default()
        });
    }

    let mut bundle: MessageBundle =
        serde_json::from_str(&data).map_err(|source| ExtractionError::Bundle {
            path: path.to_path_buf(),
            source,
        })?;
    if bundle.filename.trim().is_empty() {
        bundle.filename = filename;
    }
    Ok(bundle)
}

/// Body goes through the extractor, spreadsheet rows through the column map,
/// document text through the extractor again.
pub async fn extract_message(
    bundle: &MessageBundle,
    extractor: &dyn RecordExtractor,
    columns: &ColumnMap,
) -> Vec<ExtractionOutcome> {
    let provider = bundle.provider_hint();
    let mut outcomes = Vec::new();

    if let Some(body) = bundle.body_text() {
        outcomes.push(ExtractionOutcome {
            source: format!("{}#body", bundle.filename),
            result: extractor.extract(&body, provider.as_deref()).await,
        });
    }

    for attachment in &bundle.attachments {
        let source = format!("{}/{}", bundle.filename, attachment.filename);
        let kind = AttachmentKind::classify(&attachment.filename, &attachment.content_type);
        let result = match kind {
            AttachmentKind::Spreadsheet => match &attachment.rows {
                Some(rows) => Ok(rows
                    .iter()
                    .map(|row| columns.map_row(row, provider.as_deref()))
                    .collect()),
                None => Err(ExtractionError::Undecoded {
                    filename: attachment.filename.clone(),
                }),
            },
            AttachmentKind::Document => match attachment.text.as_deref() {
                Some(text) if !text.trim().is_empty() => {
                    extractor.extract(text, provider.as_deref()).await
                }
                Some(_) => Ok(Vec::new()),
                None => Err(ExtractionError::Undecoded {
                    filename: attachment.filename.clone(),
                }),
            },
            AttachmentKind::Other => {
                debug!(%source, "skipping unsupported attachment");
                continue;
            }
        };
        outcomes.push(ExtractionOutcome { source, result });
    }

    outcomes
}

#[derive(Debug, Clone, Deserialize)]
struct ColumnRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    columns: BTreeMap<String, String>,
    #[serde(default)]
    default_currency: Option<String>,
}

const BUILTIN_COLUMNS: &[(&str, &str)] = &[
    ("country", "country"),
    ("countryiso", "country_iso"),
    ("countrycode", "country_code"),
    ("cc", "country_code"),
    ("operator", "operator"),
    ("network", "network"),
    ("mcc", "mcc"),
    ("mnc", "mnc"),
    ("imsi", "imsi"),
    ("nnc", "nnc"),
    ("numbertype", "number_type"),
    ("destination", "destination"),
    ("previousrate", "previous_rate"),
    ("oldrate", "old_price"),
    ("currentrate", "current_rate"),
    ("newprice", "new_price"),
    ("rate", "price"),
    ("rateeur", "price"),
    ("price", "price"),
    ("currency", "currency"),
    ("variation", "variation"),
    ("change", "variation"),
    ("valid", "effective_from"),
    ("effectivedate", "effective_from"),
    ("effectivefrom", "effective_from"),
    ("count", "count"),
    ("cost", "cost"),
    ("costeur", "cost"),
    ("productcategory", "product_category"),
    ("mccmnc", "destination"),
];

/// Spreadsheet header synonyms, keyed by header reduced to `[a-z0-9]`.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    columns: HashMap<String, String>,
    /// Filled into rows whose currency cell is blank.
    default_currency: Option<String>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self::builtin()
    }
}

pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

const TEXT_FIELDS: [&str; 6] = ["mcc", "mnc", "imsi", "nnc", "destination", "effective_from"];

impl ColumnMap {
    pub fn builtin() -> Self {
        Self {
            columns: BUILTIN_COLUMNS
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            default_currency: None,
        }
    }

    /// Built-in map extended by `columns.yaml`, when that file exists.
    pub fn from_rules_dir(rules_dir: &Path) -> Result<Self> {
        let path = rules_dir.join("columns.yaml");
        let mut map = Self::builtin();
        if !path.exists() {
            return Ok(map);
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        map.extend_from_yaml(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(map)
    }

    pub fn extend_from_yaml(&mut self, text: &str) -> Result<()> {
        let rules: ColumnRulesFile = serde_yaml::from_str(text)?;
        for (from, to) in rules.columns {
            self.columns.insert(normalize_header(&from), to.trim().to_string());
        }
        if let Some(code) = rules.default_currency.filter(|c| !c.trim().is_empty()) {
            self.default_currency = Some(code.trim().to_uppercase());
        }
        Ok(())
    }

    pub fn target_for(&self, header: &str) -> Option<&str> {
        self.columns.get(&normalize_header(header)).map(String::as_str)
    }

    /// Renames known headers, then shapes the row into the full field
    /// vocabulary and normalizes it.
    pub fn map_row(&self, row: &RawRecord, provider_hint: Option<&str>) -> PricingRecord {
        let mut renamed: HashMap<String, Option<Scalar>> = HashMap::new();
        for (header, value) in row {
            let key = self.target_for(header).unwrap_or(header).to_string();
            renamed.insert(key, Scalar::from_json(value.clone()));
        }
        let cell = |key: &str| renamed.get(key).cloned().flatten();
        let number = |key: &str| cell(key).and_then(|v| coerce_number(&v)).map(Scalar::Number);

        let mut out = PricingRecord::new();
        for field in RECOGNIZED_FIELDS {
            let value = match field {
                f if TEXT_FIELDS.contains(&f) => cell(f).map(|v| Scalar::Text(v.as_text())),
                "previous_rate" => number("previous_rate").or_else(|| number("old_price")),
                "old_price" | "current_rate" | "new_price" | "price" | "count" | "cost" => {
                    number(field)
                }
                "currency" => cell("currency")
                    .filter(|v| !v.is_blank())
                    .or_else(|| self.default_currency.as_deref().map(Scalar::from)),
                "variation" => {
                    cell("variation").map(|v| Scalar::Text(v.as_text().trim().to_lowercase()))
                }
                "provider" => cell("provider").or_else(|| provider_hint.map(Scalar::from)),
                "notes" => None,
                other => cell(other),
            };
            out.insert(field, value);
        }

        let mut out = normalize_record(out);
        if out.get("provider").is_none() {
            out.insert("provider", provider_hint.map(Scalar::from));
        }
        out
    }
}

/// Strips anything `to_float` would reject at the tail of a captured number.
pub(crate) fn parse_captured_number(raw: &str) -> Option<f64> {
    to_float(raw.trim_end_matches(&['.', ','][..]))
}
