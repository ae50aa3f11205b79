//! Row to event conversion
//!
//! Column layout written by PaperCut Print Logger (0-indexed):
//!
//! | # | Column        | # | Column    |
//! |---|---------------|---|-----------|
//! | 0 | Time          | 7 | Paper Size|
//! | 1 | User          | 8 | Language  |
//! | 2 | Pages         | 9 | Height    |
//! | 3 | Copies        |10 | Width     |
//! | 4 | Printer       |11 | Duplex    |
//! | 5 | Document Name |12 | Grayscale |
//! | 6 | Client        |13 | Size      |
//!
//! Parsing never fails the whole file. A row is either converted or skipped
//! with a [`SkipReason`]; bad page/copy counts fall back to defaults.

use super::RawRecord;
use crate::config::Config;
use crate::netinfo::{HostAddress, NetworkInfoProvider, SystemNetworkInfo};
use crate::types::PrintEvent;
use chrono::NaiveDateTime;
use std::fmt;

/// Rows with fewer fields are skipped.
pub const MIN_COLUMNS: usize = 14;

/// Format of the `Time` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const COL_TIME: usize = 0;
const COL_USER: usize = 1;
const COL_PAGES: usize = 2;
const COL_COPIES: usize = 3;
const COL_PRINTER: usize = 4;
const COL_DOCUMENT: usize = 5;
const COL_CLIENT: usize = 6;
const COL_PAPER_SIZE: usize = 7;
const COL_GRAYSCALE: usize = 12;
const COL_SIZE: usize = 13;

const DEFAULT_PAGES: u32 = 0;
const DEFAULT_COPIES: u32 = 1;

/// Why a row was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer than [`MIN_COLUMNS`] fields
    TooFewColumns { found: usize },
    /// `Time` column does not match [`TIMESTAMP_FORMAT`]
    UnparseableTimestamp { value: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooFewColumns { found } => {
                write!(f, "too few columns ({} of {})", found, MIN_COLUMNS)
            }
            SkipReason::UnparseableTimestamp { value } => {
                write!(f, "unparseable timestamp '{}'", value)
            }
        }
    }
}

/// Converts raw rows into [`PrintEvent`]s.
///
/// Sector and company id come from configuration; the address pair is looked
/// up on the host at parse time. Nothing is carried over between rows.
pub struct RecordParser {
    sector: String,
    company_id: i64,
    network: Box<dyn NetworkInfoProvider>,
}

impl RecordParser {
    /// Create a parser with explicit static fields and address source.
    pub fn new(
        sector: impl Into<String>,
        company_id: i64,
        network: Box<dyn NetworkInfoProvider>,
    ) -> Self {
        Self {
            sector: sector.into(),
            company_id,
            network,
        }
    }

    /// Create a parser from configuration, reading addresses from the host.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.sector.clone(),
            config.company_id,
            Box::new(SystemNetworkInfo),
        )
    }

    /// Convert one row.
    ///
    /// Skips are logged here with the offending row; callers only count them.
    pub fn parse(&self, record: &RawRecord) -> Result<PrintEvent, SkipReason> {
        let fields = &record.fields;

        if fields.len() < MIN_COLUMNS {
            let reason = SkipReason::TooFewColumns {
                found: fields.len(),
            };
            tracing::warn!(
                position = record.position,
                fields = ?fields,
                "Skipping malformed record: {}",
                reason
            );
            return Err(reason);
        }

        let raw_time = fields[COL_TIME].trim();
        let timestamp = match NaiveDateTime::parse_from_str(raw_time, TIMESTAMP_FORMAT) {
            Ok(ts) => ts,
            Err(e) => {
                let reason = SkipReason::UnparseableTimestamp {
                    value: raw_time.to_string(),
                };
                tracing::warn!(
                    position = record.position,
                    error = %e,
                    "Skipping record: {}",
                    reason
                );
                return Err(reason);
            }
        };

        let page_count = parse_count(&fields[COL_PAGES], "pages", DEFAULT_PAGES);
        let copy_count = parse_count(&fields[COL_COPIES], "copies", DEFAULT_COPIES);

        let document_name = fields[COL_DOCUMENT].trim().to_string();
        let document_type = document_type(&document_name);

        let address = self.network.host_address().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not get network info, IP and MAC will be empty");
            HostAddress::default()
        });

        Ok(PrintEvent {
            date: timestamp.date(),
            time: timestamp.time(),
            user: fields[COL_USER].trim().to_string(),
            sector: self.sector.clone(),
            page_count,
            copy_count,
            printer_name: fields[COL_PRINTER].trim().to_string(),
            document_name,
            document_type,
            client_host_name: fields[COL_CLIENT].trim().to_string(),
            paper_size: fields[COL_PAPER_SIZE].trim().to_string(),
            color_mode: fields[COL_GRAYSCALE].trim().to_string(),
            size_label: fields[COL_SIZE].trim().to_string(),
            source_ip: address.ip,
            source_mac: address.mac,
            company_id: self.company_id,
        })
    }
}

fn parse_count(raw: &str, column: &str, default: u32) -> u32 {
    raw.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(
            column,
            value = raw,
            default,
            "Could not parse count, using default"
        );
        default
    })
}

/// Lowercase extension of the last path component, without the dot.
fn document_type(document_name: &str) -> String {
    let base = document_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(document_name);
    match base.rfind('.') {
        Some(idx) => base[idx + 1..].to_lowercase(),
        None => String::new(),
    }
}
