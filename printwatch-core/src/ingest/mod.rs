//! Ingestion layer for PaperCut daily print logs
//!
//! PaperCut Print Logger appends one CSV row per print job to
//! `papercut-print-log-YYYY-MM-DD.csv`. [`LogTailer`] remembers how far into
//! each file it has read and hands back only the rows appended since the last
//! call; [`RecordParser`] turns each row into a [`PrintEvent`](crate::PrintEvent).
//!
//! ```text
//! ┌──────────────────┐     ┌────────────┐     ┌──────────────┐
//! │ papercut-print-  │ ──► │ LogTailer  │ ──► │ RecordParser │ ──► PrintEvent
//! │ log-<day>.csv    │     │ (offsets)  │     │              │
//! └──────────────────┘     └────────────┘     └──────────────┘
//! ```
//!
//! ## Incremental reads
//!
//! Offsets are tracked per absolute path. A file seen for the first time is
//! read from byte 0 and its header row is dropped; later reads resume at the
//! stored offset and drop nothing. Only complete lines are consumed, so a row
//! PaperCut is still writing is picked up on the next call.

mod parser;

pub use parser::{RecordParser, SkipReason, MIN_COLUMNS, TIMESTAMP_FORMAT};

use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Path of the log file PaperCut writes for `day`.
pub fn log_file_path(log_dir: &Path, day: NaiveDate) -> PathBuf {
    log_dir.join(format!("papercut-print-log-{}.csv", day.format("%Y-%m-%d")))
}

/// One undecoded CSV row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Byte offset of the row within its file
    pub position: u64,
    /// Fields as read, untrimmed
    pub fields: Vec<String>,
}

impl RawRecord {
    /// Build a record from string slices (mainly for tests and tooling).
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Self {
        Self {
            position: 0,
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
        }
    }
}

/// Last consumed byte offset per log file.
///
/// Entries are added on first sight of a path and never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailPositions {
    offsets: BTreeMap<String, u64>,
}

impl TailPositions {
    fn key(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    /// Stored offset for `path`, if it has been seen
    pub fn get(&self, path: &Path) -> Option<u64> {
        self.offsets.get(&Self::key(path)).copied()
    }

    /// Record the offset for `path`
    pub fn set(&mut self, path: &Path, offset: u64) {
        self.offsets.insert(Self::key(path), offset);
    }

    /// Number of tracked files
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True when no file has been seen yet
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Load positions from `path`.
    ///
    /// A missing file yields an empty map. An undecodable file is logged and
    /// also yields an empty map, which replays today's log from the start.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&content) {
            Ok(positions) => Ok(positions),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Tail offsets file is corrupt, starting from scratch"
                );
                Ok(Self::default())
            }
        }
    }

    /// Write positions to `path` atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(self)?)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Reads newly appended rows from the daily log files.
///
/// The tailer exclusively owns its [`TailPositions`]. With a state file the
/// positions survive restarts; call [`LogTailer::persist`] once the rows of a
/// batch have been handed off.
pub struct LogTailer {
    positions: TailPositions,
    state_file: Option<PathBuf>,
}

impl LogTailer {
    /// Tailer with offsets held in memory only.
    pub fn new() -> Self {
        Self {
            positions: TailPositions::default(),
            state_file: None,
        }
    }

    /// Tailer whose offsets are loaded from and saved to `state_file`.
    pub fn with_state_file(state_file: PathBuf) -> Result<Self> {
        let positions = TailPositions::load(&state_file)?;
        tracing::info!(
            path = %state_file.display(),
            files = positions.len(),
            "Loaded tail offsets"
        );
        Ok(Self {
            positions,
            state_file: Some(state_file),
        })
    }

    /// Current tail positions
    pub fn positions(&self) -> &TailPositions {
        &self.positions
    }

    /// Stored offset for a file
    pub fn offset(&self, path: &Path) -> Option<u64> {
        self.positions.get(path)
    }

    /// Read rows appended to the log for `day` since the previous call.
    ///
    /// A missing file is not an error: the day's log may not exist yet, and
    /// an empty batch is returned. The stored offset advances to the end of
    /// the last complete line before this returns, so the same bytes are
    /// never handed out twice.
    pub fn read_new_records(&mut self, log_dir: &Path, day: NaiveDate) -> Result<TailBatch> {
        let path = log_file_path(log_dir, day);

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    path = %path.display(),
                    "Log file for today does not exist yet, skipping"
                );
                return Ok(TailBatch::missing(path));
            }
            Err(e) => return Err(e.into()),
        };

        let file_len = file.metadata()?.len();
        let mut offset = match self.positions.get(&path) {
            Some(offset) => offset,
            None => {
                tracing::info!(path = %path.display(), "Starting to read new log file from offset 0");
                0
            }
        };

        if offset > file_len {
            tracing::warn!(
                path = %path.display(),
                offset,
                file_len,
                "Log file shrank below stored offset, rereading from start"
            );
            offset = 0;
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        // Leave a partially written last line for the next call
        let complete = buf
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        buf.truncate(complete);

        let end_offset = offset + complete as u64;
        self.positions.set(&path, end_offset);

        tracing::debug!(
            path = %path.display(),
            from = offset,
            to = end_offset,
            "Updated tail offset"
        );

        Ok(TailBatch::new(path, offset, end_offset, buf))
    }

    /// Save offsets to the state file, if one is configured.
    pub fn persist(&self) -> Result<()> {
        match &self.state_file {
            Some(state_file) => self.positions.save(state_file),
            None => Ok(()),
        }
    }
}

impl Default for LogTailer {
    fn default() -> Self {
        Self::new()
    }
}

/// Rows read by one [`LogTailer::read_new_records`] call.
///
/// Iterating decodes rows lazily. A row the CSV reader cannot decode is
/// logged and skipped; the iteration continues with the next row.
pub struct TailBatch {
    path: PathBuf,
    start_offset: u64,
    end_offset: u64,
    file_present: bool,
    header_pending: bool,
    reader: csv::Reader<Cursor<Vec<u8>>>,
    record: csv::StringRecord,
    unreadable: usize,
}

impl TailBatch {
    fn new(path: PathBuf, start_offset: u64, end_offset: u64, data: Vec<u8>) -> Self {
        let reader = csv::ReaderBuilder::new()
            .delimiter(b',')
            .has_headers(false)
            .flexible(true)
            .from_reader(Cursor::new(data));

        Self {
            path,
            start_offset,
            end_offset,
            file_present: true,
            header_pending: start_offset == 0,
            reader,
            record: csv::StringRecord::new(),
            unreadable: 0,
        }
    }

    fn missing(path: PathBuf) -> Self {
        let mut batch = Self::new(path, 0, 0, Vec::new());
        batch.file_present = false;
        batch.header_pending = false;
        batch
    }

    /// Log file this batch was read from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset the read started at
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Offset stored for the next read
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// False when the day's log file did not exist
    pub fn file_present(&self) -> bool {
        self.file_present
    }

    /// Number of rows skipped because the CSV reader rejected them
    pub fn unreadable(&self) -> usize {
        self.unreadable
    }
}

impl Iterator for TailBatch {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        loop {
            match self.reader.read_record(&mut self.record) {
                Ok(false) => return None,
                Ok(true) => {
                    if self.header_pending {
                        self.header_pending = false;
                        continue;
                    }
                    let position = self.start_offset
                        + self.record.position().map(|p| p.byte()).unwrap_or(0);
                    return Some(RawRecord {
                        position,
                        fields: self.record.iter().map(str::to_string).collect(),
                    });
                }
                Err(e) => {
                    if self.header_pending {
                        self.header_pending = false;
                        tracing::warn!(
                            path = %self.path.display(),
                            error = %e,
                            "Could not decode CSV header, treating it as consumed"
                        );
                        continue;
                    }
                    self.unreadable += 1;
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Failed to read CSV record, skipping"
                    );
                }
            }
        }
    }
}
