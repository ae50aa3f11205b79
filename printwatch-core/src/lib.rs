//! # printwatch-core
//!
//! Core library for printwatch - a print-audit forwarder.
//!
//! This library provides:
//! - Incremental tailing of PaperCut Print Logger daily CSV files
//! - Conversion of log rows into [`PrintEvent`]s
//! - Verify-then-send delivery to the central collector
//! - A durable on-disk queue for events that could not be delivered
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Every tick flows through the same stages:
//! - **Drain:** retry everything in the [`PendingQueue`]
//! - **Tail:** read rows appended to today's log since the last tick
//! - **Deliver:** verify each event with the collector, send it if new,
//!   queue it if anything goes wrong
//!
//! ## Example
//!
//! ```rust,no_run
//! use printwatch_core::{Agent, Config};
//!
//! # async fn example() -> printwatch_core::Result<()> {
//! let mut config = Config::load()?;
//! config.apply_defaults();
//!
//! let mut agent = Agent::from_config(&config)?;
//! let report = agent.tick().await;
//! println!("delivered {} events", report.tail.delivered);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use agent::{Agent, AgentHandle, AgentState, AgentStats, TickReport};
pub use collector::{Deliver, DeliveryClient, DrainReport, PendingQueue};
pub use config::Config;
pub use error::{Error, Result};
pub use ingest::{LogTailer, RecordParser};
pub use types::*;

// Public modules
pub mod agent;
pub mod collector;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod netinfo;
pub mod types;
