use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::features::{FeatureVector, FEATURE_NAMES};
use crate::redis_client::ReviewQueue;
use crate::types::{ReviewTicket, Verdict};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataset CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("dataset header mismatch: {0}")]
    Header(String),

    #[error("dataset lock poisoned")]
    Poisoned,
}

/// Header of the labelled dataset: `url,status,actual,<features...>`.
pub fn dataset_header() -> Vec<&'static str> {
    ["url", "status", "actual"]
        .into_iter()
        .chain(FEATURE_NAMES.iter().copied())
        .collect()
}

/// Append-only CSV of labelled URLs, one row per distinct URL.
pub struct DatasetStore {
    path: PathBuf,
    seen: Mutex<HashSet<String>>,
}

impl DatasetStore {
    /// Opens the dataset, writing the header when the file is new or empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref().to_path_buf();
        let is_empty = match std::fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };

        let mut seen = HashSet::new();
        if is_empty {
            let mut writer = csv::Writer::from_writer(File::create(&path)?);
            writer.write_record(dataset_header())?;
            writer.flush()?;
            info!("Created dataset {}", path.display());
        } else {
            let mut reader = csv::Reader::from_path(&path)?;
            let header = reader.headers()?.clone();
            if header.iter().ne(dataset_header()) {
                return Err(DatasetError::Header(format!(
                    "{} has {} columns, expected {}",
                    path.display(),
                    header.len(),
                    dataset_header().len()
                )));
            }
            for record in reader.records() {
                if let Some(url) = record?.get(0) {
                    seen.insert(url.to_string());
                }
            }
            info!("Opened dataset {} with {} rows", path.display(), seen.len());
        }

        Ok(Self {
            path,
            seen: Mutex::new(seen),
        })
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.lock().map(|seen| seen.contains(url)).unwrap_or(false)
    }

    /// Appends one row; returns `false` when the URL is already present.
    pub fn append(
        &self,
        url: &str,
        status: Option<f64>,
        actual: Verdict,
        features: &FeatureVector,
    ) -> Result<bool, DatasetError> {
        let mut seen = self.seen.lock().map_err(|_| DatasetError::Poisoned)?;
        if seen.contains(url) {
            debug!("{} already in dataset, skipping", url);
            return Ok(false);
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        let mut row = vec![
            url.to_string(),
            status.map(|p| p.to_string()).unwrap_or_default(),
            i8::from(actual).to_string(),
        ];
        row.extend(features.as_slice().iter().map(|v| v.to_string()));
        writer.write_record(&row)?;
        writer.flush()?;

        seen.insert(url.to_string());
        Ok(true)
    }
}

/// Outcome of resolving a review ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Recorded,
    Duplicate,
}

/// Holds predictions awaiting a reviewer's label, at most `max_pending` of them.
pub struct LabelCollector {
    pending: DashMap<Uuid, ReviewTicket>,
    dataset: Arc<DatasetStore>,
    queue: Option<ReviewQueue>,
    max_pending: usize,
}

impl LabelCollector {
    pub fn new(dataset: DatasetStore, queue: Option<ReviewQueue>, max_pending: usize) -> Self {
        Self {
            pending: DashMap::new(),
            dataset: Arc::new(dataset),
            queue,
            max_pending: max_pending.max(1),
        }
    }

    /// Records a pending ticket and returns its id. Never blocks on IO; the
    /// Redis mirror, when configured, runs in a detached task.
    pub fn submit(&self, url: &str, features: FeatureVector, predicted: Option<f64>) -> Uuid {
        let ticket = ReviewTicket {
            ticket_id: Uuid::new_v4(),
            url: url.to_string(),
            features,
            predicted_probability: predicted,
            submitted_at: Utc::now(),
        };
        let ticket_id = ticket.ticket_id;

        if let Some(queue) = &self.queue {
            let queue = queue.clone();
            let mirrored = ticket.clone();
            tokio::spawn(async move {
                if let Err(e) = queue.enqueue(&mirrored).await {
                    warn!("Failed to mirror review ticket {}: {}", mirrored.ticket_id, e);
                }
            });
        }

        self.pending.insert(ticket_id, ticket);
        debug!("Review ticket {} pending", ticket_id);
        self.evict_oldest();
        ticket_id
    }

    fn evict_oldest(&self) {
        while self.pending.len() > self.max_pending {
            let oldest = self
                .pending
                .iter()
                .min_by_key(|entry| entry.value().submitted_at)
                .map(|entry| *entry.key());
            let Some(ticket_id) = oldest else { break };
            if self.pending.remove(&ticket_id).is_some() {
                metrics::counter!("reviews_evicted_total").increment(1);
                debug!("Review ticket {} evicted unlabelled", ticket_id);
            }
        }
    }

    /// Pending tickets, oldest first.
    pub fn pending(&self) -> Vec<ReviewTicket> {
        let mut tickets: Vec<ReviewTicket> =
            self.pending.iter().map(|entry| entry.value().clone()).collect();
        tickets.sort_by_key(|t| t.submitted_at);
        tickets
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Applies a reviewer label: appends the ticket to the dataset and drops it
    /// from the pending set. The ticket stays pending if the write fails.
    pub async fn resolve(&self, ticket_id: Uuid, actual: Verdict) -> Result<Resolution, AppError> {
        let ticket = self
            .pending
            .get(&ticket_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("review ticket {ticket_id}")))?;

        let dataset = Arc::clone(&self.dataset);
        let written = tokio::task::spawn_blocking(move || {
            dataset.append(
                &ticket.url,
                ticket.predicted_probability,
                actual,
                &ticket.features,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("dataset task failed: {e}")))?;

        let resolution = match written {
            Ok(true) => {
                metrics::counter!("labels_recorded_total").increment(1);
                info!("Recorded label {:?} for ticket {}", actual, ticket_id);
                Resolution::Recorded
            }
            Ok(false) => Resolution::Duplicate,
            Err(e) => {
                warn!("Failed to write ticket {} to dataset: {}", ticket_id, e);
                return Err(e.into());
            }
        };

        self.pending.remove(&ticket_id);
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Feature, FEATURE_COUNT};

    fn vector() -> FeatureVector {
        let mut values = [0.0; FEATURE_COUNT];
        values[Feature::LengthUrl.index()] = 22.0;
        FeatureVector::from_values(values)
    }

    fn row_count(path: &Path) -> usize {
        csv::Reader::from_path(path).unwrap().records().count()
    }

    #[test]
    fn creates_header_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new_data.csv");
        DatasetStore::open(&path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(header.len(), 3 + FEATURE_COUNT);
        assert_eq!(&header[0], "url");
        assert_eq!(&header[3], "google_index");
    }

    #[test]
    fn same_url_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new_data.csv");
        let store = DatasetStore::open(&path).unwrap();

        assert!(store.append("http://a.com/", Some(0.9), Verdict::Phishing, &vector()).unwrap());
        assert!(!store.append("http://a.com/", Some(0.1), Verdict::Safe, &vector()).unwrap());
        assert_eq!(row_count(&path), 1);

        // Reopening picks up what is already on disk.
        let reopened = DatasetStore::open(&path).unwrap();
        assert!(reopened.contains("http://a.com/"));
        assert!(!reopened.append("http://a.com/", None, Verdict::Other, &vector()).unwrap());
        assert_eq!(row_count(&path), 1);
    }

    #[test]
    fn row_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new_data.csv");
        let store = DatasetStore::open(&path).unwrap();
        store.append("http://b.com/", None, Verdict::Other, &vector()).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[0], "http://b.com/");
        assert_eq!(&row[1], "");
        assert_eq!(&row[2], "-1");
        assert_eq!(&row[3 + Feature::LengthUrl.index()], "22");
    }

    #[test]
    fn foreign_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        assert!(matches!(DatasetStore::open(&path), Err(DatasetError::Header(_))));
    }

    #[tokio::test]
    async fn resolve_appends_and_clears_ticket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new_data.csv");
        let collector = LabelCollector::new(DatasetStore::open(&path).unwrap(), None, 100);

        let ticket = collector.submit("http://c.com/", vector(), Some(0.7));
        assert_eq!(collector.pending_count(), 1);
        assert_eq!(collector.pending()[0].url, "http://c.com/");

        let resolution = tokio_test::assert_ok!(collector.resolve(ticket, Verdict::Phishing).await);
        assert_eq!(resolution, Resolution::Recorded);
        assert_eq!(collector.pending_count(), 0);
        assert_eq!(row_count(&path), 1);

        let again = collector.submit("http://c.com/", vector(), Some(0.2));
        let resolution = tokio_test::assert_ok!(collector.resolve(again, Verdict::Safe).await);
        assert_eq!(resolution, Resolution::Duplicate);
        assert_eq!(row_count(&path), 1);
    }

    #[tokio::test]
    async fn unknown_ticket_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let collector =
            LabelCollector::new(DatasetStore::open(dir.path().join("d.csv")).unwrap(), None, 100);
        let err = tokio_test::assert_err!(collector.resolve(Uuid::new_v4(), Verdict::Safe).await);
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn pending_tickets_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let collector =
            LabelCollector::new(DatasetStore::open(dir.path().join("d.csv")).unwrap(), None, 3);

        let mut newest = Uuid::nil();
        for i in 0..10 {
            newest = collector.submit(&format!("http://site{i}.com/"), vector(), Some(0.5));
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            assert!(collector.pending_count() <= 3);
        }
        assert_eq!(collector.pending_count(), 3);
        assert!(collector.pending().iter().any(|t| t.ticket_id == newest));
        assert!(collector.pending().iter().all(|t| t.url != "http://site0.com/"));
    }
}
