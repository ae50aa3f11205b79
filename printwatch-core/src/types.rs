//! Core domain types for printwatch
//!
//! [`PrintEvent`] is the unit of work: one normalized row of a PaperCut
//! print log, ready to send to the collector.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// One print job as the collector receives it.
///
/// Every field is derived from a single CSV row plus static configuration.
/// The collector's verify endpoint matches on the full field tuple, so there
/// is no separate identity key.
///
/// Field names on the wire are fixed by the collector schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintEvent {
    /// Calendar date of the job (`YYYY-MM-DD`)
    #[serde(rename = "data")]
    pub date: NaiveDate,
    /// Local clock time of the job (`HH:MM:SS`)
    #[serde(rename = "hora")]
    pub time: NaiveTime,
    #[serde(rename = "usuario")]
    pub user: String,
    /// Sector/department, from configuration
    #[serde(rename = "setor")]
    pub sector: String,
    #[serde(rename = "paginas")]
    pub page_count: u32,
    #[serde(rename = "copias")]
    pub copy_count: u32,
    #[serde(rename = "impressora")]
    pub printer_name: String,
    #[serde(rename = "nomearquivo")]
    pub document_name: String,
    /// Lowercase file extension of the document, without the dot
    #[serde(rename = "tipo")]
    pub document_type: String,
    #[serde(rename = "nomepc")]
    pub client_host_name: String,
    #[serde(rename = "tipopage")]
    pub paper_size: String,
    /// Raw `Grayscale` column value
    #[serde(rename = "cor")]
    pub color_mode: String,
    /// Raw `Size` column value
    #[serde(rename = "tamanho")]
    pub size_label: String,
    /// IPv4 address of the host running the agent
    #[serde(rename = "ip")]
    pub source_ip: String,
    /// Hardware address of the interface carrying `source_ip`
    #[serde(rename = "mac")]
    pub source_mac: String,
    /// Company id, from configuration
    #[serde(rename = "empresa")]
    pub company_id: i64,
}

/// Result of pushing one event through verify-then-send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The collector accepted the event
    Delivered,
    /// The collector already had an identical event
    AlreadyExists,
    /// Network failure or non-success status; the event must be retried
    Failed(String),
}

impl DeliveryOutcome {
    /// True when the event no longer needs to be retried
    pub fn is_settled(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered | DeliveryOutcome::AlreadyExists)
    }
}
