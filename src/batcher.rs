// src/batcher.rs

//! Per-flow log batching and the serialized per-flow emission path.
//!
//! - [`LogBatch`] is the pure batching state: it accumulates serialized
//!   log records and decides when a batch is full or due. It has no
//!   channels and no Tokio tasks, so it can be tested directly.
//! - [`LogBatcher`] is the cheap, cloneable handle query tasks use to
//!   append log lines. Appends go over an unbounded channel and never block.
//! - The emitter task owns the `LogBatch` for one flow and is the only
//!   writer of that flow's messages to the outbound channel, which is what
//!   keeps batch ids ordered and the `FlowStats` last.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::ExecutorConfig;
use crate::protocol::{FlowStats, LogMessage, LogRecord, Message, Payload, QueryResponse};
use crate::types::{AuthState, LogLevel};

/// Flush thresholds for a flow's log batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Flush once a batch holds this many lines.
    pub max_rows: u64,
    /// Flush once the serialized body reaches this many bytes.
    pub max_bytes: usize,
    /// Flush this long after the first line of a batch was appended.
    pub interval: Duration,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::from(&ExecutorConfig::default())
    }
}

impl From<&ExecutorConfig> for BatchLimits {
    fn from(cfg: &ExecutorConfig) -> Self {
        Self {
            max_rows: cfg.log_batch_max_rows,
            max_bytes: cfg.log_batch_max_bytes,
            interval: Duration::from_millis(cfg.log_batch_interval_ms),
        }
    }
}

/// Pending batch plus the sequence counters of one flow.
#[derive(Debug)]
pub struct LogBatch {
    limits: BatchLimits,
    next_id: u64,
    rows_emitted: u64,
    pending_rows: u64,
    body: String,
    opened_at: Option<Instant>,
}

impl LogBatch {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            next_id: 0,
            rows_emitted: 0,
            pending_rows: 0,
            body: String::new(),
            opened_at: None,
        }
    }

    /// Add one record. Returns a finished batch if a size threshold was hit.
    pub fn push(&mut self, record: &LogRecord, now: Instant) -> Option<LogMessage> {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "dropping unserializable log record");
                return None;
            }
        };

        if self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
        self.body.push_str(&line);
        self.body.push('\n');
        self.pending_rows += 1;

        if self.pending_rows >= self.limits.max_rows || self.body.len() >= self.limits.max_bytes {
            return self.flush();
        }
        None
    }

    /// When the pending batch becomes due, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|t| t + self.limits.interval)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }

    /// Close the pending batch. `None` when nothing is pending.
    pub fn flush(&mut self) -> Option<LogMessage> {
        if self.pending_rows == 0 {
            return None;
        }

        let message = LogMessage {
            id: self.next_id,
            number_of_rows: self.pending_rows,
            start_row: self.rows_emitted,
            jsonl: std::mem::take(&mut self.body),
        };

        self.next_id += 1;
        self.rows_emitted += self.pending_rows;
        self.pending_rows = 0;
        self.opened_at = None;

        Some(message)
    }

    pub fn pending_rows(&self) -> u64 {
        self.pending_rows
    }

    /// Id the next flushed batch will carry.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }
}

/// Work items for a flow's emitter task.
#[derive(Debug)]
pub(crate) enum FlowEvent {
    Log(LogRecord),
    Rows { query: String, rows: Vec<Value> },
    Finish(FlowStats),
}

/// Handle for appending to one flow's log.
///
/// Clones share the same emitter. Once the flow has been finished, appends
/// are refused and return `false`.
#[derive(Debug, Clone)]
pub struct LogBatcher {
    flow_id: Arc<str>,
    tx: mpsc::UnboundedSender<FlowEvent>,
    clock: Arc<dyn Clock>,
}

impl LogBatcher {
    /// Spawn the emitter task for `flow_id` and return a handle to it.
    ///
    /// Every message the emitter produces is stamped with `flow_id` and
    /// `request_id` and written to `outbound`.
    pub fn spawn(
        flow_id: impl Into<String>,
        request_id: Option<u64>,
        limits: BatchLimits,
        clock: Arc<dyn Clock>,
        outbound: mpsc::Sender<Message>,
    ) -> (Self, JoinHandle<()>) {
        let flow_id: Arc<str> = Arc::from(flow_id.into());
        let (tx, rx) = mpsc::unbounded_channel();

        let emitter = Emitter {
            flow_id: Arc::clone(&flow_id),
            request_id,
            batch: LogBatch::new(limits),
            parts: HashMap::new(),
            outbound,
            outbound_closed: false,
        };
        let handle = tokio::spawn(emitter.run(rx));

        (Self { flow_id, tx, clock }, handle)
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    /// Append one log line, stamped with the current clock time.
    pub fn append(&self, level: LogLevel, text: impl Into<String>) -> bool {
        let record = LogRecord {
            timestamp: self.clock.now(),
            level,
            message: text.into(),
        };
        self.send(FlowEvent::Log(record))
    }

    /// Queue a chunk of result rows for `query`.
    pub fn send_rows(&self, query: &str, rows: Vec<Value>) -> bool {
        if rows.is_empty() {
            return true;
        }
        self.send(FlowEvent::Rows {
            query: query.to_string(),
            rows,
        })
    }

    /// Flush whatever is pending, then emit `stats` as the flow's last message.
    pub(crate) fn finish(&self, stats: FlowStats) -> bool {
        self.send(FlowEvent::Finish(stats))
    }

    fn send(&self, event: FlowEvent) -> bool {
        if self.tx.send(event).is_err() {
            debug!(flow_id = %self.flow_id, "flow already finished; dropping late output");
            return false;
        }
        true
    }
}

/// Single writer of one flow's outbound messages.
struct Emitter {
    flow_id: Arc<str>,
    request_id: Option<u64>,
    batch: LogBatch,
    parts: HashMap<String, u64>,
    outbound: mpsc::Sender<Message>,
    outbound_closed: bool,
}

impl Emitter {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<FlowEvent>) {
        loop {
            let deadline = self.batch.deadline();

            let event = tokio::select! {
                event = rx.recv() => event,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_logs().await;
                    continue;
                }
            };

            match event {
                Some(FlowEvent::Log(record)) => {
                    if let Some(batch) = self.batch.push(&record, Instant::now()) {
                        self.emit_logs(batch).await;
                    }
                }
                Some(FlowEvent::Rows { query, rows }) => {
                    self.emit_rows(query, rows).await;
                }
                Some(FlowEvent::Finish(stats)) => {
                    self.flush_logs().await;
                    debug!(flow_id = %self.flow_id, status = ?stats.status, "emitting flow stats");
                    self.emit(Payload::FlowStats(stats)).await;
                    break;
                }
                None => {
                    // Every handle dropped without a finish; push out what we have.
                    self.flush_logs().await;
                    break;
                }
            }
        }

        debug!(
            flow_id = %self.flow_id,
            batches = self.batch.next_id(),
            rows = self.batch.rows_emitted(),
            "flow emitter finished"
        );
    }

    async fn flush_logs(&mut self) {
        if let Some(batch) = self.batch.flush() {
            self.emit_logs(batch).await;
        }
    }

    async fn emit_logs(&mut self, batch: LogMessage) {
        debug!(
            flow_id = %self.flow_id,
            batch_id = batch.id,
            rows = batch.number_of_rows,
            "emitting log batch"
        );
        self.emit(Payload::LogMessage(batch)).await;
    }

    async fn emit_rows(&mut self, query: String, rows: Vec<Value>) {
        let mut jsonl = String::new();
        let mut total_rows = 0u64;
        for row in &rows {
            match serde_json::to_string(row) {
                Ok(line) => {
                    jsonl.push_str(&line);
                    jsonl.push('\n');
                    total_rows += 1;
                }
                Err(err) => warn!(flow_id = %self.flow_id, query = %query, error = %err, "dropping unserializable row"),
            }
        }

        let part = self.parts.entry(query.clone()).or_insert(0);
        let response = QueryResponse {
            query,
            part: *part,
            jsonl,
            total_rows,
        };
        *part += 1;

        self.emit(Payload::QueryResponse(response)).await;
    }

    async fn emit(&mut self, payload: Payload) {
        if self.outbound_closed {
            return;
        }

        let message = Message {
            auth_state: AuthState::Authenticated,
            session_id: self.flow_id.to_string(),
            request_id: self.request_id,
            payload,
        };

        if self.outbound.send(message).await.is_err() {
            warn!(flow_id = %self.flow_id, "outbound channel closed; discarding flow output");
            self.outbound_closed = true;
        }
    }
}
