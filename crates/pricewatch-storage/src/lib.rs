//! Durable snapshot storage for pricewatch runs.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use pricewatch_core::{PricingRecord, Snapshot};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pricewatch-storage";

pub const LATEST_FILE_NAME: &str = "latest.json";

/// Run-scoped location of the snapshot artifacts.
#[derive(Debug, Clone)]
pub struct SnapshotLayout {
    pub dir: PathBuf,
    pub run_date: NaiveDate,
}

impl SnapshotLayout {
    pub fn new(dir: impl Into<PathBuf>, run_date: NaiveDate) -> Self {
        Self {
            dir: dir.into(),
            run_date,
        }
    }

    pub fn dated_path(&self) -> PathBuf {
        self.dir
            .join(format!("parsed_{}.json", self.run_date.format("%Y-%m-%d")))
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(LATEST_FILE_NAME)
    }
}

#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub dated_path: PathBuf,
    pub latest_path: PathBuf,
    pub content_hash: String,
    pub row_count: usize,
}

#[derive(Debug, Error)]
pub enum SnapshotLoadError {
    #[error("no snapshot at {0}")]
    Missing(PathBuf),
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected snapshot shape in {0}")]
    Shape(PathBuf),
}

#[derive(Serialize)]
struct SnapshotEnvelope<'a> {
    date: Option<NaiveDate>,
    rows: &'a [PricingRecord],
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    layout: SnapshotLayout,
}

impl SnapshotStore {
    pub fn new(layout: SnapshotLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &SnapshotLayout {
        &self.layout
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Most recently saved snapshot, or an empty one when there is no usable
    /// history. Failures are logged, never returned.
    pub async fn load_latest(&self) -> Snapshot {
        let path = self.layout.latest_path();
        match Self::try_load(&path).await {
            Ok(snapshot) => {
                info!(path = %path.display(), rows = snapshot.len(), "loaded previous snapshot");
                snapshot
            }
            Err(SnapshotLoadError::Missing(_)) => {
                info!(path = %path.display(), "no previous snapshot; starting from empty");
                Snapshot::empty()
            }
            Err(err) => {
                warn!(error = %err, "previous snapshot unusable; starting from empty");
                Snapshot::empty()
            }
        }
    }

    pub async fn try_load(path: &Path) -> Result<Snapshot, SnapshotLoadError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SnapshotLoadError::Missing(path.to_path_buf()));
            }
            Err(source) => {
                return Err(SnapshotLoadError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let value: JsonValue =
            serde_json::from_slice(&bytes).map_err(|source| SnapshotLoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        decode_snapshot(value).ok_or_else(|| SnapshotLoadError::Shape(path.to_path_buf()))
    }

    /// Persist to the layout's dated path and refresh `latest.json`.
    pub async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<SavedSnapshot> {
        self.save_to(snapshot, &self.layout.dated_path(), &self.layout.latest_path())
            .await
    }

    pub async fn save_to(
        &self,
        snapshot: &Snapshot,
        dated_path: &Path,
        latest_path: &Path,
    ) -> anyhow::Result<SavedSnapshot> {
        let span = info_span!(
            "snapshot_save",
            dated = %dated_path.display(),
            rows = snapshot.len()
        );
        async {
            let envelope = SnapshotEnvelope {
                date: snapshot.date.or(Some(self.layout.run_date)),
                rows: &snapshot.rows,
            };
            let bytes = serde_json::to_vec_pretty(&envelope).context("serializing snapshot")?;

            write_atomically(dated_path, &bytes).await?;
            write_atomically(latest_path, &bytes).await?;
            info!(latest = %latest_path.display(), "snapshot saved");

            Ok::<_, anyhow::Error>(SavedSnapshot {
                dated_path: dated_path.to_path_buf(),
                latest_path: latest_path.to_path_buf(),
                content_hash: Self::sha256_hex(&bytes),
                row_count: snapshot.len(),
            })
        }
        .instrument(span)
        .await
    }
}

/// Accepts `{"date": .., "rows": [..]}` or a bare `[..]`. Non-object rows are
/// skipped.
fn decode_snapshot(value: JsonValue) -> Option<Snapshot> {
    let (date, rows) = match value {
        JsonValue::Array(rows) => (None, rows),
        JsonValue::Object(mut map) => {
            let rows = match map.remove("rows")? {
                JsonValue::Array(rows) => rows,
                _ => return None,
            };
            let date = map
                .get("date")
                .and_then(JsonValue::as_str)
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
            (date, rows)
        }
        _ => return None,
    };

    let total = rows.len();
    let rows: Vec<PricingRecord> = rows
        .into_iter()
        .filter_map(|row| match row {
            JsonValue::Object(map) => Some(PricingRecord::from_json_map(map)),
            _ => None,
        })
        .collect();
    if rows.len() < total {
        warn!(skipped = total - rows.len(), "snapshot contained non-object rows");
    }
    Some(Snapshot { date, rows })
}

/// Whole-file replace via a temp sibling and rename.
async fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating snapshot directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp snapshot file {}", temp_path.display()))?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err)
            .with_context(|| format!("writing temp snapshot file {}", temp_path.display()));
    }

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming temp snapshot {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 8).expect("date")
    }

    fn record(country: &str, price: f64) -> PricingRecord {
        PricingRecord::new()
            .with("country", country)
            .with("mcc", "419")
            .with("price", price)
    }

    #[test]
    fn layout_paths_are_date_stamped() {
        let layout = SnapshotLayout::new("logs", run_date());
        assert_eq!(layout.dated_path(), PathBuf::from("logs/parsed_2025-09-08.json"));
        assert_eq!(layout.latest_path(), PathBuf::from("logs/latest.json"));
    }

    #[tokio::test]
    async fn save_then_load_latest_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(SnapshotLayout::new(dir.path().join("logs"), run_date()));
        let snapshot = Snapshot::new(
            run_date(),
            vec![record("Kuwait", 0.03), record("Oman", 0.04)],
        );

        let saved = store.save(&snapshot).await.expect("save");
        assert!(saved.dated_path.exists());
        assert!(saved.latest_path.exists());
        assert_eq!(saved.row_count, 2);
        assert_eq!(saved.content_hash.len(), 64);

        let loaded = store.load_latest().await;
        assert_eq!(loaded, snapshot);
        let dated = SnapshotStore::try_load(&saved.dated_path).await.expect("dated");
        assert_eq!(dated, snapshot);
    }

    #[tokio::test]
    async fn empty_snapshot_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(SnapshotLayout::new(dir.path(), run_date()));
        store.save(&Snapshot::empty()).await.expect("save");
        let loaded = store.load_latest().await;
        assert!(loaded.is_empty());
        assert_eq!(loaded.date, Some(run_date()));
    }

    #[tokio::test]
    async fn write_failures_are_returned_with_the_path() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("logs");
        std::fs::write(&blocker, b"not a directory").expect("write");
        let store = SnapshotStore::new(SnapshotLayout::new(&blocker, run_date()));
        let snapshot = Snapshot::new(run_date(), vec![record("Kuwait", 0.03)]);

        let err = store.save(&snapshot).await.expect_err("save into a file");
        assert!(format!("{err:#}").contains(&blocker.display().to_string()));

        let latest = dir.path().join("latest.json");
        std::fs::write(&latest, b"[]").expect("write");
        let err = store
            .save_to(&snapshot, &blocker.join("parsed_2025-09-08.json"), &latest)
            .await
            .expect_err("dated write fails");
        assert!(format!("{err:#}").contains("creating snapshot directory"));
        assert_eq!(std::fs::read(&latest).expect("read"), b"[]");
    }

    #[tokio::test]
    async fn missing_or_corrupt_history_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(SnapshotLayout::new(dir.path(), run_date()));
        assert!(store.load_latest().await.is_empty());
        assert!(matches!(
            SnapshotStore::try_load(&store.layout().latest_path()).await,
            Err(SnapshotLoadError::Missing(_))
        ));

        std::fs::write(store.layout().latest_path(), b"{ not json").expect("write");
        assert!(store.load_latest().await.is_empty());
        assert!(matches!(
            SnapshotStore::try_load(&store.layout().latest_path()).await,
            Err(SnapshotLoadError::Parse { .. })
        ));

        std::fs::write(store.layout().latest_path(), br#"{"date": "2025-09-07"}"#).expect("write");
        assert!(matches!(
            SnapshotStore::try_load(&store.layout().latest_path()).await,
            Err(SnapshotLoadError::Shape(_))
        ));
    }

    #[tokio::test]
    async fn bare_array_snapshots_are_accepted() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("legacy.json");
        std::fs::write(
            &path,
            br#"[{"country": "Kuwait", "price": 0.03}, "stray", {"country": "Oman"}]"#,
        )
        .expect("write");

        let loaded = SnapshotStore::try_load(&path).await.expect("load");
        assert_eq!(loaded.date, None);
        assert_eq!(loaded.rows.len(), 2);
        assert_eq!(
            loaded.rows[0],
            PricingRecord::new().with("country", "Kuwait").with("price", 0.03)
        );
    }

    #[tokio::test]
    async fn save_overwrites_latest_and_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(SnapshotLayout::new(dir.path(), run_date()));
        store
            .save(&Snapshot::new(run_date(), vec![record("Kuwait", 0.03)]))
            .await
            .expect("first save");
        store
            .save(&Snapshot::new(run_date(), vec![record("Kuwait", 0.05)]))
            .await
            .expect("second save");

        let loaded = store.load_latest().await;
        assert_eq!(loaded.rows, vec![record("Kuwait", 0.05)]);
        let leftovers = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
