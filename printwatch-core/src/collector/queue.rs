//! Durable queue of events whose delivery failed
//!
//! One JSON file per event in a single directory. File names are creation
//! timestamps in nanoseconds (`<id>.json`), strictly increasing within a
//! process, so they are unique and sort by age. Writes go to a `.tmp` file
//! first and are renamed into place, so a crash never leaves a half-written
//! record under a `.json` name.
//!
//! The queue owns its directory; nothing else writes to it.

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::types::{DeliveryOutcome, PrintEvent};

use super::Deliver;

const RECORD_EXT: &str = "json";
const TMP_SUFFIX: &str = ".json.tmp";

/// Identity of a pending record (its file stem).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PendingId(String);

impl PendingId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Counters from one [`PendingQueue::drain`] pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Records found at the start of the pass
    pub found: usize,
    /// Delivered or confirmed duplicate, then removed
    pub retired: usize,
    /// Undecodable records removed
    pub purged: usize,
    /// Left in place for the next pass
    pub kept: usize,
}

/// Filesystem-backed pending queue
pub struct PendingQueue {
    dir: PathBuf,
    last_id: AtomicU64,
}

impl PendingQueue {
    /// Open (creating if needed) the queue at `dir`.
    ///
    /// Leftover `.tmp` files from an interrupted enqueue are removed: their
    /// rows were never marked consumed, so they will be read again.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::Queue(format!(
                "failed to create pending directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        for entry in fs::read_dir(&dir)?.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(TMP_SUFFIX) {
                tracing::warn!(path = %entry.path().display(), "Removing incomplete pending record");
                if let Err(e) = fs::remove_file(entry.path()) {
                    tracing::warn!(error = %e, "Failed to remove incomplete pending record");
                }
            }
        }

        tracing::info!(path = %dir.display(), "Pending queue initialized");

        Ok(Self {
            dir,
            last_id: AtomicU64::new(0),
        })
    }

    /// Directory backing the queue
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &PendingId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXT))
    }

    fn next_id(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let mut candidate = now;
        // fetch_update with an always-Some closure cannot fail
        let _ = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                candidate = now.max(last + 1);
                Some(candidate)
            });
        candidate
    }

    /// Durably store `event`. An error here means the event may be lost.
    pub fn enqueue(&self, event: &PrintEvent) -> Result<PendingId> {
        let data = serde_json::to_vec_pretty(event)?;

        let mut id = PendingId(self.next_id().to_string());
        // Ids from an earlier process run can be ahead of this clock
        while self.record_path(&id).exists() {
            id = PendingId(self.next_id().to_string());
        }

        let path = self.record_path(&id);
        let tmp = self.dir.join(format!("{}{}", id, TMP_SUFFIX));

        let written = (|| -> std::io::Result<()> {
            // The directory may have been removed since open
            fs::create_dir_all(&self.dir)?;
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Queue(format!(
                "failed to write pending record '{}': {}",
                path.display(),
                e
            )));
        }

        tracing::info!(
            user = %event.user,
            path = %path.display(),
            "Saved event to pending queue"
        );
        Ok(id)
    }

    /// Ids of all stored records, oldest first
    pub fn list(&self) -> Result<Vec<PendingId>> {
        read_ids(&self.dir).map_err(|e| {
            Error::Queue(format!(
                "could not read pending directory '{}': {}",
                self.dir.display(),
                e
            ))
        })
    }

    /// Ids stored under `dir`, without creating or cleaning it.
    ///
    /// For inspecting a queue another process owns. A missing directory
    /// holds no records.
    pub fn list_at(dir: &Path) -> Result<Vec<PendingId>> {
        match read_ids(dir) {
            Ok(ids) => Ok(ids),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of stored records
    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    /// True when nothing is pending
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.list()?.is_empty())
    }

    /// Read and decode one record.
    ///
    /// Returns [`Error::Io`] when the file cannot be read and [`Error::Json`]
    /// when it cannot be decoded.
    pub fn load(&self, id: &PendingId) -> Result<PrintEvent> {
        let data = fs::read(self.record_path(id))?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Delete one record
    pub fn remove(&self, id: &PendingId) -> Result<()> {
        fs::remove_file(self.record_path(id))?;
        Ok(())
    }

    /// Retry every stored record once.
    ///
    /// Delivered or already-existing records are removed, undecodable ones
    /// are purged, failed ones stay for the next pass. There is no backoff
    /// and no retry limit.
    pub async fn drain<D: Deliver>(&mut self, delivery: &D) -> Result<DrainReport> {
        let ids = self.list()?;
        let mut report = DrainReport {
            found: ids.len(),
            ..Default::default()
        };

        if ids.is_empty() {
            tracing::debug!("No pending events to process");
            return Ok(report);
        }

        tracing::info!(count = ids.len(), "Found pending events to process");

        for id in ids {
            let event = match self.load(&id) {
                Ok(event) => event,
                Err(Error::Json(e)) => {
                    tracing::error!(
                        id = %id,
                        error = %e,
                        "Failed to decode pending record, deleting corrupt file"
                    );
                    if let Err(e) = self.remove(&id) {
                        tracing::error!(id = %id, error = %e, "Failed to delete corrupt pending record");
                    }
                    report.purged += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(id = %id, error = %e, "Failed to read pending record");
                    report.kept += 1;
                    continue;
                }
            };

            match delivery.deliver(&event).await {
                DeliveryOutcome::Failed(reason) => {
                    tracing::info!(id = %id, reason = %reason, "Pending event still failing, will retry later");
                    report.kept += 1;
                }
                _ => {
                    if let Err(e) = self.remove(&id) {
                        tracing::error!(id = %id, error = %e, "Failed to remove processed pending record");
                    }
                    tracing::info!(id = %id, "Processed pending event, removed from queue");
                    report.retired += 1;
                }
            }
        }

        Ok(report)
    }
}

fn read_ids(dir: &Path) -> std::io::Result<Vec<PendingId>> {
    let mut ids: Vec<PendingId> = fs::read_dir(dir)?
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension()? != RECORD_EXT {
                return None;
            }
            Some(PendingId(path.file_stem()?.to_str()?.to_string()))
        })
        .collect();

    ids.sort();
    Ok(ids)
}
