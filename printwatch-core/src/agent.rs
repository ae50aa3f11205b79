//! Polling agent
//!
//! Each tick drains the pending queue, then tails today's log:
//!
//! ```text
//! Idle ──tick──► Draining ──► Tailing ──► Idle
//!   │                │            │
//!   └────── stop ────┴────────────┴──────► Stopped
//! ```
//!
//! A stop request is honored at the next phase boundary; rows already being
//! delivered finish first. [`AgentHandle`] reports the current state and
//! running totals without interrupting the tick.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::collector::{Deliver, DeliveryClient, DrainReport, PendingQueue};
use crate::config::Config;
use crate::error::Result;
use crate::ingest::{LogTailer, RecordParser};
use crate::types::DeliveryOutcome;

/// Phase the agent is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Waiting for the next tick
    Idle,
    /// Retrying pending records
    Draining,
    /// Reading and delivering today's new rows
    Tailing,
    /// Run loop has exited
    Stopped,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Idle => "idle",
            AgentState::Draining => "draining",
            AgentState::Tailing => "tailing",
            AgentState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Counters from the tailing phase of one tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TailReport {
    /// Whether today's log file existed
    pub file_present: bool,
    /// Rows decoded from the CSV
    pub rows_read: usize,
    /// Rows dropped by the reader or the parser
    pub skipped: usize,
    pub delivered: usize,
    pub already_existing: usize,
    /// Failed deliveries saved to the pending queue
    pub enqueued: usize,
    /// Failed deliveries that could not be saved either
    pub enqueue_failures: usize,
}

/// Result of one tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub drain: DrainReport,
    pub tail: TailReport,
}

/// Totals since the agent started
#[derive(Debug, Default, Clone)]
pub struct AgentStats {
    pub ticks: u64,
    pub delivered: usize,
    pub already_existing: usize,
    pub enqueued: usize,
    pub enqueue_failures: usize,
    pub retired: usize,
    pub purged: usize,
    pub skipped: usize,
    pub last_tick: Option<DateTime<Local>>,
}

impl AgentStats {
    fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.delivered += report.tail.delivered;
        self.already_existing += report.tail.already_existing;
        self.enqueued += report.tail.enqueued;
        self.enqueue_failures += report.tail.enqueue_failures;
        self.retired += report.drain.retired;
        self.purged += report.drain.purged;
        self.skipped += report.tail.skipped;
        self.last_tick = Some(Local::now());
    }
}

/// Cloneable handle for querying and stopping a running agent
#[derive(Clone)]
pub struct AgentHandle {
    state: watch::Receiver<AgentState>,
    stats: watch::Receiver<AgentStats>,
    stop: Arc<watch::Sender<bool>>,
}

impl AgentHandle {
    /// Current phase
    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Totals so far
    pub fn stats(&self) -> AgentStats {
        self.stats.borrow().clone()
    }

    /// Ask the agent to stop at the next phase boundary
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

/// Ties tailer, parser, delivery and pending queue together.
pub struct Agent<D: Deliver> {
    log_dir: PathBuf,
    interval: Duration,
    tailer: LogTailer,
    parser: RecordParser,
    queue: PendingQueue,
    delivery: D,
    state: watch::Sender<AgentState>,
    stats: watch::Sender<AgentStats>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl Agent<DeliveryClient> {
    /// Build an agent with the HTTP delivery client and on-disk state
    /// described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let tailer = match config.state.offsets_file() {
            Some(path) => LogTailer::with_state_file(path)?,
            None => LogTailer::new(),
        };
        let queue = PendingQueue::open(config.state.pending_dir())?;
        let delivery = DeliveryClient::from_config(config)?;

        Ok(Self::new(
            config,
            tailer,
            RecordParser::from_config(config),
            queue,
            delivery,
        ))
    }
}

impl<D: Deliver> Agent<D> {
    /// Assemble an agent from its parts
    pub fn new(
        config: &Config,
        tailer: LogTailer,
        parser: RecordParser,
        queue: PendingQueue,
        delivery: D,
    ) -> Self {
        let mut interval = config.polling_interval();
        if interval.is_zero() {
            interval = Duration::from_secs(10);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            log_dir: config.log_dir.clone(),
            interval,
            tailer,
            parser,
            queue,
            delivery,
            state: watch::channel(AgentState::Idle).0,
            stats: watch::channel(AgentStats::default()).0,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    /// Handle for status queries and stop requests
    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            state: self.state.subscribe(),
            stats: self.stats.subscribe(),
            stop: self.stop_tx.clone(),
        }
    }

    /// Pending queue used by this agent
    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    fn set_state(&self, state: AgentState) {
        self.state.send_replace(state);
    }

    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Tick once at startup, then every polling interval, until stopped.
    ///
    /// A tick that overruns the interval delays the next one rather than
    /// skipping it.
    pub async fn run(&mut self) -> Result<()> {
        let mut stop = self.stop_rx.clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            log_dir = %self.log_dir.display(),
            interval_secs = self.interval.as_secs(),
            "Agent started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.wait_for(|stopped| *stopped) => {}
            }
            if self.stop_requested() {
                break;
            }
            self.tick().await;
        }

        self.set_state(AgentState::Stopped);
        tracing::info!("Agent stopped");
        Ok(())
    }

    /// One drain + tail cycle over today's log
    pub async fn tick(&mut self) -> TickReport {
        self.tick_for_day(Local::now().date_naive()).await
    }

    /// One drain + tail cycle over the log for `day`
    pub async fn tick_for_day(&mut self, day: NaiveDate) -> TickReport {
        let mut report = TickReport::default();

        self.set_state(AgentState::Draining);
        match self.queue.drain(&self.delivery).await {
            Ok(drain) => report.drain = drain,
            Err(e) => tracing::error!(error = %e, "Error while processing pending queue"),
        }

        if !self.stop_requested() {
            self.set_state(AgentState::Tailing);
            match self.tail(day).await {
                Ok(tail) => report.tail = tail,
                Err(e) => tracing::error!(error = %e, "Error during log processing"),
            }
        }

        self.set_state(AgentState::Idle);
        self.stats.send_modify(|stats| stats.record(&report));
        report
    }

    async fn tail(&mut self, day: NaiveDate) -> Result<TailReport> {
        let mut batch = self.tailer.read_new_records(&self.log_dir, day)?;
        let mut report = TailReport {
            file_present: batch.file_present(),
            ..Default::default()
        };

        for record in &mut batch {
            report.rows_read += 1;

            let event = match self.parser.parse(&record) {
                Ok(event) => event,
                Err(_) => {
                    report.skipped += 1;
                    continue;
                }
            };

            match self.delivery.deliver(&event).await {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::AlreadyExists => report.already_existing += 1,
                DeliveryOutcome::Failed(_) => match self.queue.enqueue(&event) {
                    Ok(_) => report.enqueued += 1,
                    Err(e) => {
                        report.enqueue_failures += 1;
                        tracing::error!(
                            user = %event.user,
                            error = %e,
                            "CRITICAL: failed to save pending event, data may be lost"
                        );
                    }
                },
            }
        }
        report.skipped += batch.unreadable();

        // Offsets are durable only once every row above has been handed off
        self.tailer.persist()?;

        if report.rows_read > 0 {
            tracing::info!(
                path = %batch.path().display(),
                offset = batch.end_offset(),
                rows = report.rows_read,
                delivered = report.delivered,
                already_existing = report.already_existing,
                enqueued = report.enqueued,
                skipped = report.skipped,
                "Processed new log rows"
            );
        }

        Ok(report)
    }
}
